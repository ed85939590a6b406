// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Connection tracking.
//!
//! Forward/return classification is backed by a key/value cache
//! shared by every simulation worker. When a packet of an untracked
//! flow is classified as forward, the key of its mirrored flow is
//! written with [`RETURN_FLOW_MARKER`]. A later packet travelling the
//! other way looks up its own key, finds the marker, and is thereby
//! classified as return traffic.
//!
//! Keys are scoped to the forwarding element being simulated so that
//! the same 5-tuple crossing two routers is tracked independently:
//!
//! ```text
//! {device}|{proto}|{src_ip}:{src_port}|{dst_ip}:{dst_port}
//! ```
//!
//! The protocol is rendered as its number. Because mirroring swaps
//! both the addresses and the ports, `reverse(reverse(k)) == k`.

use super::packet::FlowSig;
use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;
use core::fmt::Display;
use core::future::Future;
use core::pin::Pin;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use vrn_api::DeviceId;

/// The value recorded under the key of an expected return flow.
pub const RETURN_FLOW_MARKER: &str = "r";

pub const CT_DEF_EXPIRE_SECS: u64 = 60;

/// A failure of the connection tracking cache.
///
/// The engine never retries and never substitutes a default: the
/// error is handed to the caller of [`Condition::matches()`].
///
/// [`Condition::matches()`]: super::condition::Condition::matches
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum CacheError {
    #[error("connection tracking cache unavailable")]
    Unavailable,

    #[error("connection tracking cache timed out")]
    Timeout,

    #[error("connection tracking cache error: {0}")]
    Backend(String),
}

/// The future returned by the non-blocking reads of
/// [`ConnTrackCache`].
pub type CacheFuture<'a> = Pin<
    Box<dyn Future<Output = Result<Option<String>, CacheError>> + Send + 'a>,
>;

/// The consumed interface of the connection tracking cache.
///
/// Implementations are shared between workers and must tolerate
/// concurrent use without the caller holding a lock. Entries expire
/// after [`ConnTrackCache::expiration_secs()`]; expiry is advisory.
pub trait ConnTrackCache: Send + Sync {
    /// Blocking read.
    fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Non-blocking read.
    fn get_async<'a>(&'a self, key: &'a str) -> CacheFuture<'a>;

    /// Blocking read which also refreshes the expiration of the entry.
    fn get_and_touch(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Non-blocking read which also refreshes the expiration of the
    /// entry.
    fn get_and_touch_async<'a>(&'a self, key: &'a str) -> CacheFuture<'a>;

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    fn expiration_secs(&self) -> u64;
}

/// The cache key of one direction of a flow through one device.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ConnTrackKey(String);

impl ConnTrackKey {
    pub fn new(device: DeviceId, sig: &FlowSig) -> Self {
        Self(format!("{device}|{sig}"))
    }

    /// The key of the opposite direction of `sig`.
    pub fn reverse(device: DeviceId, sig: &FlowSig) -> Self {
        Self::new(device, &sig.mirror())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ConnTrackKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration of the in-memory cache.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ConnTrackCfg {
    pub name: String,
    pub expiration_secs: u64,
}

impl Default for ConnTrackCfg {
    fn default() -> Self {
        Self {
            name: String::from("conn_track"),
            expiration_secs: CT_DEF_EXPIRE_SECS,
        }
    }
}

cfg_if! {
    if #[cfg(feature = "std")] {
        use crate::ddi::sync::KMutex;
        use crate::ddi::time::MILLIS;
        use crate::ddi::time::Moment;
        use crate::provider::LogLevel;
        use crate::provider::LogProvider;
        use crate::provider::Providers;
        use alloc::collections::BTreeMap;
        use alloc::sync::Arc;
        use alloc::vec::Vec;

        /// The Time To Live in milliseconds.
        #[derive(Clone, Copy, Debug, Eq, PartialEq)]
        pub struct Ttl(u64);

        impl Ttl {
            pub fn as_seconds(&self) -> u64 {
                self.0 / MILLIS
            }

            pub fn as_milliseconds(&self) -> u64 {
                self.0
            }

            /// Is `last_hit` expired?
            pub fn is_expired(&self, last_hit: Moment, now: Moment) -> bool {
                now.delta_as_millis(last_hit) >= self.0
            }

            /// Create a new TTL based on seconds. A TTL too large to
            /// represent in milliseconds is clamped.
            pub const fn new_seconds(seconds: u64) -> Self {
                Ttl(seconds.saturating_mul(MILLIS))
            }
        }

        #[derive(Clone, Debug)]
        struct CacheEntry {
            value: String,
            last_hit: Moment,
        }

        /// An in-process [`ConnTrackCache`].
        ///
        /// Expired entries are invisible to readers but only removed by
        /// [`MemCache::expire_entries()`], which the owner is expected
        /// to call periodically.
        pub struct MemCache {
            name: String,
            ttl: Ttl,
            map: KMutex<BTreeMap<String, CacheEntry>>,
            log: Arc<dyn LogProvider>,
        }

        impl MemCache {
            pub fn new(cfg: &ConnTrackCfg, providers: &Providers) -> Self {
                Self {
                    name: cfg.name.clone(),
                    ttl: Ttl::new_seconds(cfg.expiration_secs),
                    map: KMutex::new(BTreeMap::new()),
                    log: providers.log.clone(),
                }
            }

            pub fn name(&self) -> &str {
                &self.name
            }

            pub fn ttl(&self) -> Ttl {
                self.ttl
            }

            pub fn num_entries(&self) -> usize {
                self.map.lock().len()
            }

            pub fn clear(&self) {
                self.map.lock().clear()
            }

            pub fn dump(&self) -> Vec<(String, String)> {
                self.map
                    .lock()
                    .iter()
                    .map(|(k, e)| (k.clone(), e.value.clone()))
                    .collect()
            }

            /// Remove every entry not hit within the TTL as of `now`,
            /// returning the number removed.
            pub fn expire_entries(&self, now: Moment) -> usize {
                let ttl = self.ttl;
                let mut map = self.map.lock();
                let before = map.len();
                map.retain(|_, e| !ttl.is_expired(e.last_hit, now));
                let expired = before - map.len();
                drop(map);

                if expired > 0 {
                    self.log.log(
                        LogLevel::Note,
                        &format!("{}: expired {expired} entries", self.name),
                    );
                }

                expired
            }

            fn lookup(&self, key: &str, touch: bool) -> Option<String> {
                let now = Moment::now();
                let mut map = self.map.lock();
                let entry = map.get_mut(key)?;
                if self.ttl.is_expired(entry.last_hit, now) {
                    return None;
                }

                if touch {
                    entry.last_hit = now;
                }

                Some(entry.value.clone())
            }
        }

        impl ConnTrackCache for MemCache {
            fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
                Ok(self.lookup(key, false))
            }

            fn get_async<'a>(&'a self, key: &'a str) -> CacheFuture<'a> {
                Box::pin(core::future::ready(self.get(key)))
            }

            fn get_and_touch(
                &self,
                key: &str,
            ) -> Result<Option<String>, CacheError> {
                Ok(self.lookup(key, true))
            }

            fn get_and_touch_async<'a>(
                &'a self,
                key: &'a str,
            ) -> CacheFuture<'a> {
                Box::pin(core::future::ready(self.get_and_touch(key)))
            }

            fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
                let entry = CacheEntry {
                    value: String::from(value),
                    last_hit: Moment::now(),
                };
                self.map.lock().insert(String::from(key), entry);
                Ok(())
            }

            fn expiration_secs(&self) -> u64 {
                self.ttl.as_seconds()
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod test {
    use super::*;
    use crate::provider::NullLog;
    use core::time::Duration;
    use vrn_api::Protocol;

    fn sig() -> FlowSig {
        FlowSig {
            proto: Protocol::UDP,
            src: "10.0.20.6".parse().unwrap(),
            dst: "10.0.11.34".parse().unwrap(),
            src_port: 4321,
            dst_port: 53,
        }
    }

    fn cache() -> MemCache {
        MemCache::new(
            &ConnTrackCfg::default(),
            &Providers::new(Box::new(NullLog)),
        )
    }

    #[test]
    fn key_format() {
        let dev = DeviceId::from_u128(1);
        let key = ConnTrackKey::new(dev, &sig());
        assert_eq!(
            key.as_str(),
            "00000000-0000-0000-0000-000000000001|17|10.0.20.6:4321|10.0.11.34:53"
        );
        let rev = ConnTrackKey::reverse(dev, &sig());
        assert_eq!(
            rev.as_str(),
            "00000000-0000-0000-0000-000000000001|17|10.0.11.34:53|10.0.20.6:4321"
        );
        assert_eq!(ConnTrackKey::reverse(dev, &sig().mirror()), key);
        assert_ne!(ConnTrackKey::new(DeviceId::from_u128(2), &sig()), key);
    }

    #[test]
    fn default_cfg() {
        let c = cache();
        assert_eq!(c.expiration_secs(), 60);
        assert_eq!(c.ttl().as_milliseconds(), 60_000);
        assert_eq!(c.name(), "conn_track");
    }

    #[test]
    fn set_get_touch() {
        let c = cache();
        assert_eq!(c.get("a"), Ok(None));
        c.set("a", RETURN_FLOW_MARKER).unwrap();
        assert_eq!(c.get("a"), Ok(Some("r".to_string())));
        assert_eq!(c.get_and_touch("a"), Ok(Some("r".to_string())));
        assert_eq!(c.num_entries(), 1);
        assert_eq!(c.dump(), vec![("a".to_string(), "r".to_string())]);
        c.clear();
        assert_eq!(c.num_entries(), 0);
    }

    #[test]
    fn expire() {
        let c = cache();
        c.set("a", "r").unwrap();
        c.set("b", "r").unwrap();
        assert_eq!(c.expire_entries(Moment::now()), 0);
        let later = Moment::now() + Duration::from_secs(61);
        assert_eq!(c.expire_entries(later), 2);
        assert_eq!(c.get("a"), Ok(None));
    }

    #[test]
    fn huge_ttl_clamped() {
        let cfg: ConnTrackCfg = serde_json::from_str(
            r#"{"name":"ct","expiration_secs":18446744073709551615}"#,
        )
        .unwrap();
        let c = MemCache::new(&cfg, &Providers::new(Box::new(NullLog)));
        assert_eq!(c.ttl().as_milliseconds(), u64::MAX);
        assert_eq!(c.expiration_secs(), u64::MAX / MILLIS);

        c.set("a", "r").unwrap();
        let decade = Duration::from_secs(10 * 365 * 24 * 60 * 60);
        assert_eq!(c.expire_entries(Moment::now() + decade), 0);
        assert_eq!(c.get("a"), Ok(Some("r".to_string())));
    }

    #[tokio::test]
    async fn async_touch_refreshes_entry() {
        let cfg = ConnTrackCfg { name: "ct".to_string(), expiration_secs: 1 };
        let c = MemCache::new(&cfg, &Providers::new(Box::new(NullLog)));
        c.set("touched", "r").unwrap();
        c.set("read", "r").unwrap();

        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(
            c.get_and_touch_async("touched").await,
            Ok(Some("r".to_string()))
        );
        assert_eq!(c.get_async("read").await, Ok(Some("r".to_string())));

        // 1.2 seconds after the write, 0.6 after the touch.
        std::thread::sleep(Duration::from_millis(600));
        assert_eq!(c.get_async("touched").await, Ok(Some("r".to_string())));
        assert_eq!(c.get_async("read").await, Ok(None));
    }

    #[test]
    fn zero_ttl_hides_entries() {
        let cfg = ConnTrackCfg { name: "ct".to_string(), expiration_secs: 0 };
        let c = MemCache::new(&cfg, &Providers::new(Box::new(NullLog)));
        c.set("a", "r").unwrap();
        assert_eq!(c.get("a"), Ok(None));
        assert_eq!(c.num_entries(), 1);
    }
}
