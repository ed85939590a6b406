// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Rule configuration.
//!
//! Conditions are stored serialized, keyed by [`RuleId`], in whatever
//! backs a [`RuleStore`]. Validation happens entirely while decoding:
//! a value which decodes is a valid [`Condition`].
//!
//! Static rule sets may also be written by hand as TOML or RON, see
//! [`ConditionSet`].

use crate::api::ConfigError;
use crate::api::RuleId;
use crate::ddi::sync::KMutex;
use crate::engine::condition::Condition;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::string::String;
use std::string::ToString;
use std::vec::Vec;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CfgError {
    #[error("rule {0} not found")]
    NotFound(RuleId),

    #[error("failed to decode rule {id}: {msg}")]
    Decode { id: RuleId, msg: String },

    #[error("failed to encode: {0}")]
    Encode(String),

    #[error("failed to parse rule set: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigError),

    #[error("rule store error: {0}")]
    Store(String),
}

/// The serialization used for stored conditions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Encoding {
    #[default]
    Json,
    Postcard,
    Ron,
}

impl core::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "postcard" => Ok(Self::Postcard),
            "ron" => Ok(Self::Ron),
            _ => Err(format!("unknown encoding: {s}")),
        }
    }
}

pub fn encode<T: Serialize>(enc: Encoding, val: &T) -> Result<Vec<u8>, CfgError> {
    match enc {
        Encoding::Json => {
            serde_json::to_vec(val).map_err(|e| CfgError::Encode(e.to_string()))
        }
        Encoding::Postcard => postcard::to_allocvec(val)
            .map_err(|e| CfgError::Encode(e.to_string())),
        Encoding::Ron => ron::to_string(val)
            .map(String::into_bytes)
            .map_err(|e| CfgError::Encode(e.to_string())),
    }
}

/// Decode a value, reporting failures as a plain message.
pub fn decode<T: DeserializeOwned>(
    enc: Encoding,
    bytes: &[u8],
) -> Result<T, String> {
    match enc {
        Encoding::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        Encoding::Postcard => {
            postcard::from_bytes(bytes).map_err(|e| e.to_string())
        }
        Encoding::Ron => {
            let s = std::str::from_utf8(bytes).map_err(|e| e.to_string())?;
            ron::from_str(s).map_err(|e| e.to_string())
        }
    }
}

/// The consumed interface of the rule configuration store.
pub trait RuleStore: Send + Sync {
    fn get(&self, id: RuleId) -> Result<Option<Vec<u8>>, CfgError>;
    fn put(&self, id: RuleId, data: Vec<u8>) -> Result<(), CfgError>;
    fn ids(&self) -> Result<Vec<RuleId>, CfgError>;
}

/// A [`RuleStore`] held in memory.
#[derive(Debug, Default)]
pub struct MemRuleStore {
    map: KMutex<BTreeMap<RuleId, Vec<u8>>>,
}

impl MemRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleStore for MemRuleStore {
    fn get(&self, id: RuleId) -> Result<Option<Vec<u8>>, CfgError> {
        Ok(self.map.lock().get(&id).cloned())
    }

    fn put(&self, id: RuleId, data: Vec<u8>) -> Result<(), CfgError> {
        self.map.lock().insert(id, data);
        Ok(())
    }

    fn ids(&self) -> Result<Vec<RuleId>, CfgError> {
        Ok(self.map.lock().keys().copied().collect())
    }
}

/// Load and decode the condition stored under `id`.
///
/// A condition which fails to decode is logged and rejected. One
/// which decodes but can never match is logged and returned.
pub fn load_condition(
    store: &dyn RuleStore,
    enc: Encoding,
    id: RuleId,
    log: &dyn LogProvider,
) -> Result<Condition, CfgError> {
    let bytes = store.get(id)?.ok_or(CfgError::NotFound(id))?;
    let cond: Condition = decode(enc, &bytes).map_err(|msg| {
        log.log(LogLevel::Error, &format!("rule {id}: rejected: {msg}"));
        CfgError::Decode { id, msg }
    })?;

    for lint in cond.lint() {
        log.log(LogLevel::Warn, &format!("rule {id}: {lint}"));
    }

    Ok(cond)
}

pub fn store_condition(
    store: &dyn RuleStore,
    enc: Encoding,
    id: RuleId,
    cond: &Condition,
) -> Result<(), CfgError> {
    store.put(id, encode(enc, cond)?)
}

/// A named collection of conditions, written by hand.
///
/// ```toml
/// [conditions.web]
/// nw_proto = 6
/// tp_dst_start = 80
/// tp_dst_end = 80
/// ```
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConditionSet {
    #[serde(default)]
    pub conditions: BTreeMap<String, Condition>,
}

impl ConditionSet {
    pub fn from_toml(s: &str) -> Result<Self, CfgError> {
        toml::from_str(s).map_err(|e| CfgError::Parse(e.to_string()))
    }

    pub fn from_ron(s: &str) -> Result<Self, CfgError> {
        ron::from_str(s).map_err(|e| CfgError::Parse(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, CfgError> {
        toml::to_string(self).map_err(|e| CfgError::Encode(e.to_string()))
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self, CfgError> {
        let s = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("ron") => Self::from_ron(&s),
            _ => Self::from_toml(&s),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Condition> {
        self.conditions.get(name)
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Condition)> {
        self.conditions.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::provider::NullLog;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Capture(Mutex<Vec<(LogLevel, String)>>);

    impl LogProvider for Capture {
        fn log(&self, level: LogLevel, msg: &str) {
            self.0.lock().unwrap().push((level, msg.to_string()));
        }
    }

    fn cond() -> Condition {
        Condition {
            nw_proto: Some(6),
            nw_src_ip: Some("10.0.20.3/24".parse().unwrap()),
            tp_dst_start: 80,
            tp_dst_end: 80,
            tp_dst_inv: true,
            ..Default::default()
        }
    }

    #[test]
    fn store_and_load() {
        let store = MemRuleStore::new();
        let id = RuleId::from_u128(1);
        for enc in [Encoding::Json, Encoding::Postcard, Encoding::Ron] {
            store_condition(&store, enc, id, &cond()).unwrap();
            let back = load_condition(&store, enc, id, &NullLog).unwrap();
            assert_eq!(back, cond());
        }
        assert_eq!(store.ids().unwrap(), vec![id]);
    }

    #[test]
    fn missing_rule() {
        let store = MemRuleStore::new();
        let err =
            load_condition(&store, Encoding::Json, RuleId::from_u128(9), &NullLog)
                .unwrap_err();
        assert!(matches!(err, CfgError::NotFound(_)));
    }

    #[test]
    fn bad_prefix_rejected_and_logged() {
        let store = MemRuleStore::new();
        let id = RuleId::from_u128(2);
        let json = r#"{"nw_src_ip":{"addr":{"inner":[10,0,20,3]},"prefix_len":33}}"#;
        store.put(id, json.as_bytes().to_vec()).unwrap();

        let log = Capture::default();
        let err = load_condition(&store, Encoding::Json, id, &log).unwrap_err();
        assert!(matches!(err, CfgError::Decode { .. }));
        let msgs = log.0.lock().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].0, LogLevel::Error);
    }

    #[test]
    fn lints_logged_on_load() {
        let store = MemRuleStore::new();
        let id = RuleId::from_u128(3);
        let json = r#"{"tp_src_start":4321,"tp_src_end":4320}"#;
        store.put(id, json.as_bytes().to_vec()).unwrap();

        let log = Capture::default();
        let cond = load_condition(&store, Encoding::Json, id, &log).unwrap();
        assert_eq!(cond.tp_src_start, 4321);
        let msgs = log.0.lock().unwrap();
        assert_eq!(
            msgs[0],
            (LogLevel::Warn, format!("rule {id}: tp_src range is empty"))
        );
    }

    #[test]
    fn toml_rule_set() {
        let doc = r#"
            [conditions.web]
            nw_proto = 6
            tp_dst_start = 80
            tp_dst_end = 80

            [conditions.not_mgmt]
            nw_src_inv = true
            nw_src_ip = { addr = { inner = [10, 0, 0, 0] }, prefix_len = 8 }
        "#;
        let set = ConditionSet::from_toml(doc).unwrap();
        assert_eq!(set.len(), 2);

        let web = set.get("web").unwrap();
        assert_eq!(web.nw_proto, Some(6));
        assert_eq!(web.tp_src_end, u16::MAX);
        assert_eq!((web.tp_dst_start, web.tp_dst_end), (80, 80));

        let mgmt = set.get("not_mgmt").unwrap();
        assert!(mgmt.nw_src_inv);
        assert_eq!(mgmt.nw_src_ip.unwrap().to_string(), "10.0.0.0/8");

        let again = ConditionSet::from_toml(&set.to_toml().unwrap()).unwrap();
        assert_eq!(again, set);
    }

    #[test]
    fn toml_bad_prefix() {
        let doc = r#"
            [conditions.bad]
            nw_dst_ip = { addr = { inner = [10, 0, 0, 0] }, prefix_len = 33 }
        "#;
        assert!(matches!(
            ConditionSet::from_toml(doc),
            Err(CfgError::Parse(_))
        ));
    }

    #[test]
    fn ron_rule_set() {
        let doc = r#"(
            conditions: {
                "dns": (
                    nw_proto: Some(17),
                    tp_dst_start: 53,
                    tp_dst_end: 53,
                    match_forward_flow: true,
                ),
            },
        )"#;
        let set = ConditionSet::from_ron(doc).unwrap();
        let dns = set.get("dns").unwrap();
        assert_eq!(dns.nw_proto, Some(17));
        assert!(dns.match_forward_flow);
        assert!(dns.in_port_ids.is_none());
    }

    #[test]
    fn rule_set_from_path() {
        let dir = std::env::temp_dir();
        let toml_path = dir.join(format!("vrn-cfg-{}.toml", std::process::id()));
        let ron_path = dir.join(format!("vrn-cfg-{}.ron", std::process::id()));
        std::fs::write(&toml_path, "[conditions.icmp]\nnw_proto = 1\n")
            .unwrap();
        std::fs::write(
            &ron_path,
            "(conditions: {\"icmp\": (nw_proto: Some(1))})",
        )
        .unwrap();

        let from_toml = ConditionSet::from_path(&toml_path).unwrap();
        let from_ron = ConditionSet::from_path(&ron_path).unwrap();
        std::fs::remove_file(&toml_path).unwrap();
        std::fs::remove_file(&ron_path).unwrap();

        assert_eq!(from_toml, from_ron);
        assert_eq!(from_toml.get("icmp").unwrap().nw_proto, Some(1));

        assert!(matches!(
            ConditionSet::from_path(&toml_path),
            Err(CfgError::Io(_))
        ));
    }

    #[test]
    fn encoding_from_str() {
        assert_eq!("JSON".parse::<Encoding>(), Ok(Encoding::Json));
        assert_eq!("ron".parse::<Encoding>(), Ok(Encoding::Ron));
        assert!("xml".parse::<Encoding>().is_err());
    }
}
