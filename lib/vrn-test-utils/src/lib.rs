// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

use rand::Rng;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

// Let's make our lives easier and pub use a bunch of stuff.
pub use vrn::api::DeviceId;
pub use vrn::api::ETHER_TYPE_ARP;
pub use vrn::api::ETHER_TYPE_IPV4;
pub use vrn::api::GroupId;
pub use vrn::api::Ipv4Addr;
pub use vrn::api::Ipv4Prefix;
pub use vrn::api::MacAddr;
pub use vrn::api::PortId;
pub use vrn::api::Protocol;
pub use vrn::api::RuleId;
pub use vrn::engine::condition::Condition;
pub use vrn::engine::conn_track::CacheError;
pub use vrn::engine::conn_track::CacheFuture;
pub use vrn::engine::conn_track::ConnTrackCache;
pub use vrn::engine::conn_track::ConnTrackCfg;
pub use vrn::engine::conn_track::ConnTrackKey;
pub use vrn::engine::conn_track::MemCache;
pub use vrn::engine::conn_track::RETURN_FLOW_MARKER;
pub use vrn::engine::context::EvalContext;
pub use vrn::engine::context::FlowState;
pub use vrn::engine::flow_match::FlowKey;
pub use vrn::engine::flow_match::FlowMatch;
pub use vrn::engine::packet::PacketDescriptor;
pub use vrn::provider::NullLog;
pub use vrn::provider::Providers;

pub const PKT_IN_PORT: u32 = 5;
pub const PKT_SRC_IP: Ipv4Addr = Ipv4Addr::from_const([10, 0, 20, 6]);
pub const PKT_DST_IP: Ipv4Addr = Ipv4Addr::from_const([10, 0, 11, 34]);
pub const PKT_SRC_PORT: u16 = 4321;
pub const PKT_DST_PORT: u16 = 1234;
pub const PKT_TOS: u8 = 34;

/// The canonical TCP packet the condition tests evaluate against.
pub fn pkt_fixture() -> PacketDescriptor {
    PacketDescriptor::new()
        .with_in_port(PKT_IN_PORT)
        .with_dl_src(MacAddr::from_const([0x02, 0x11, 0x33, 0x00, 0x11, 0x01]))
        .with_dl_dst(MacAddr::from_const([0x02, 0x11, 0xAA, 0xEE, 0x22, 0x05]))
        .with_ether_type(ETHER_TYPE_IPV4)
        .with_nw_src(PKT_SRC_IP)
        .with_nw_dst(PKT_DST_IP)
        .with_nw_proto(u8::from(Protocol::TCP))
        .with_nw_tos(PKT_TOS)
        .with_tp_src(PKT_SRC_PORT)
        .with_tp_dst(PKT_DST_PORT)
}

/// The reply to `pkt`: addresses and ports swapped.
pub fn reply_of(pkt: &PacketDescriptor) -> PacketDescriptor {
    PacketDescriptor {
        dl_src: pkt.dl_dst,
        dl_dst: pkt.dl_src,
        nw_src: pkt.nw_dst,
        nw_dst: pkt.nw_src,
        tp_src: pkt.tp_dst,
        tp_dst: pkt.tp_src,
        ..*pkt
    }
}

pub fn random_port_id() -> PortId {
    PortId::from_u128(rand::rng().random())
}

pub fn random_group_id() -> GroupId {
    GroupId::from_u128(rand::rng().random())
}

pub fn random_device_id() -> DeviceId {
    DeviceId::from_u128(rand::rng().random())
}

/// A cache which answers every read with the same scripted value and
/// counts the traffic it sees.
#[derive(Debug, Default)]
pub struct DummyCache {
    stored: Mutex<Option<String>>,
    sets: Mutex<Vec<(String, String)>>,
    gets: AtomicUsize,
    touches: AtomicUsize,
}

impl DummyCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_stored_value(&self, val: Option<&str>) {
        *self.stored.lock().unwrap() = val.map(str::to_string);
    }

    pub fn num_gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// The number of reads which refreshed expiry.
    pub fn num_touches(&self) -> usize {
        self.touches.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> Vec<(String, String)> {
        self.sets.lock().unwrap().clone()
    }

    fn read(&self) -> Result<Option<String>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored.lock().unwrap().clone())
    }
}

impl ConnTrackCache for DummyCache {
    fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        self.read()
    }

    fn get_async<'a>(&'a self, _key: &'a str) -> CacheFuture<'a> {
        Box::pin(std::future::ready(self.read()))
    }

    fn get_and_touch(&self, _key: &str) -> Result<Option<String>, CacheError> {
        self.touches.fetch_add(1, Ordering::SeqCst);
        self.read()
    }

    fn get_and_touch_async<'a>(&'a self, key: &'a str) -> CacheFuture<'a> {
        Box::pin(std::future::ready(self.get_and_touch(key)))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.sets.lock().unwrap().push((key.to_string(), value.to_string()));
        Ok(())
    }

    fn expiration_secs(&self) -> u64 {
        0
    }
}

/// A cache which fails every operation with the given error.
#[derive(Debug)]
pub struct FailingCache(pub CacheError);

impl ConnTrackCache for FailingCache {
    fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(self.0.clone())
    }

    fn get_async<'a>(&'a self, key: &'a str) -> CacheFuture<'a> {
        Box::pin(std::future::ready(self.get(key)))
    }

    fn get_and_touch(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(self.0.clone())
    }

    fn get_and_touch_async<'a>(&'a self, key: &'a str) -> CacheFuture<'a> {
        Box::pin(std::future::ready(self.get_and_touch(key)))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
        Err(self.0.clone())
    }

    fn expiration_secs(&self) -> u64 {
        0
    }
}

/// A fresh in-memory cache with the default TTL.
pub fn mem_cache() -> Arc<MemCache> {
    Arc::new(MemCache::new(
        &ConnTrackCfg::default(),
        &Providers::new(Box::new(NullLog)),
    ))
}

/// A context on a random device with a random ingress port.
pub fn ctx_with(cache: Arc<dyn ConnTrackCache>) -> EvalContext {
    EvalContext::new(random_device_id(), cache).with_in_port(random_port_id())
}
