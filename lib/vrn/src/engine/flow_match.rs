// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Exact-match flow keys.
//!
//! Once the simulation reaches a decision for a packet, the fields
//! that pinned the decision are assembled into a [`FlowMatch`], which
//! becomes the key of that decision in the fast-path flow table.
//! Subsequent packets with the same key bypass the simulation.
//!
//! Most keys can be installed in the kernel datapath. A few cannot be
//! expressed there; a match containing any of them must be handled
//! in software, which consumers discover through
//! [`FlowMatch::is_user_space_only()`].

use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use core::hash::Hash;
use core::hash::Hasher;
use crc32fast::Hasher as Crc32;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use vrn_api::Ipv4Addr;
use vrn_api::MacAddr;

/// A single exact-match field.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FlowKey {
    /// The datapath port number of ingress.
    InPort(u32),
    Ethernet { src: MacAddr, dst: MacAddr },
    EtherType(u16),
    /// The 802.1Q tag control information.
    Vlan(u16),
    Ipv4 { src: Ipv4Addr, dst: Ipv4Addr, proto: u8, tos: u8 },
    Tcp { src: u16, dst: u16 },
    Udp { src: u16, dst: u16 },
    Icmp { ty: u8, code: u8 },
    Arp { op: u16, sip: Ipv4Addr, tip: Ipv4Addr, sha: MacAddr, tha: MacAddr },
    /// The tunnel metadata of an encapsulated packet.
    Tunnel { id: u64, src: Ipv4Addr, dst: Ipv4Addr },
    Priority(u32),

    /// An ICMP echo request or reply along with its identifier. The
    /// datapath has no notion of the identifier.
    IcmpEcho { ty: u8, code: u8, id: u16 },

    /// An ICMP error along with the leading bytes of the offending
    /// packet it quotes.
    IcmpError { ty: u8, code: u8, data: Vec<u8> },
}

impl FlowKey {
    /// Can this key only be matched in software?
    pub fn is_user_space_only(&self) -> bool {
        match self {
            Self::InPort(_)
            | Self::Ethernet { .. }
            | Self::EtherType(_)
            | Self::Vlan(_)
            | Self::Ipv4 { .. }
            | Self::Tcp { .. }
            | Self::Udp { .. }
            | Self::Icmp { .. }
            | Self::Arp { .. }
            | Self::Tunnel { .. }
            | Self::Priority(_) => false,

            Self::IcmpEcho { .. } | Self::IcmpError { .. } => true,
        }
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InPort(port) => write!(f, "in_port({port})"),
            Self::Ethernet { src, dst } => {
                write!(f, "eth(src={src},dst={dst})")
            }
            Self::EtherType(et) => write!(f, "eth_type(0x{et:04x})"),
            Self::Vlan(tci) => write!(f, "vlan(tci=0x{tci:04x})"),
            Self::Ipv4 { src, dst, proto, tos } => write!(
                f,
                "ipv4(src={src},dst={dst},proto={proto},tos={tos})"
            ),
            Self::Tcp { src, dst } => write!(f, "tcp(src={src},dst={dst})"),
            Self::Udp { src, dst } => write!(f, "udp(src={src},dst={dst})"),
            Self::Icmp { ty, code } => {
                write!(f, "icmp(type={ty},code={code})")
            }
            Self::Arp { op, sip, tip, sha, tha } => write!(
                f,
                "arp(op={op},sip={sip},tip={tip},sha={sha},tha={tha})"
            ),
            Self::Tunnel { id, src, dst } => {
                write!(f, "tunnel(id={id},src={src},dst={dst})")
            }
            Self::Priority(prio) => write!(f, "priority({prio})"),
            Self::IcmpEcho { ty, code, id } => {
                write!(f, "icmp_echo(type={ty},code={code},id={id})")
            }
            Self::IcmpError { ty, code, data } => write!(
                f,
                "icmp_error(type={ty},code={code},data={}B)",
                data.len()
            ),
        }
    }
}

/// An ordered collection of [`FlowKey`]s.
///
/// Two matches are equal, and hash the same, when their keys are
/// equal element-wise in the same order. The user-space-only flag is
/// derived from the keys and does not take part in comparison.
///
/// On the wire a match is simply its list of keys; the flag is
/// recomputed when decoding.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(from = "Vec<FlowKey>", into = "Vec<FlowKey>")]
pub struct FlowMatch {
    keys: Vec<FlowKey>,
    user_space_only: bool,
}

impl FlowMatch {
    pub fn new(keys: Vec<FlowKey>) -> Self {
        let mut fm = Self::default();
        fm.set_keys(keys);
        fm
    }

    /// Append a key.
    pub fn add_key(&mut self, key: FlowKey) -> &mut Self {
        self.user_space_only |= key.is_user_space_only();
        self.keys.push(key);
        self
    }

    /// Replace every key, recomputing the user-space-only flag from
    /// scratch.
    pub fn set_keys(&mut self, keys: Vec<FlowKey>) -> &mut Self {
        self.user_space_only = keys.iter().any(FlowKey::is_user_space_only);
        self.keys = keys;
        self
    }

    pub fn keys(&self) -> &[FlowKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Does this match contain a key the kernel datapath cannot
    /// express?
    pub fn is_user_space_only(&self) -> bool {
        self.user_space_only
    }

    /// A stable hash of the key sequence, suitable for bucketing flows.
    pub fn crc32(&self) -> u32 {
        let mut hasher = Crc32::new();
        self.hash(&mut hasher);
        hasher.finalize()
    }
}

impl PartialEq for FlowMatch {
    fn eq(&self, other: &Self) -> bool {
        self.keys == other.keys
    }
}

impl Eq for FlowMatch {}

impl Hash for FlowMatch {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.keys.hash(state);
    }
}

impl From<Vec<FlowKey>> for FlowMatch {
    fn from(keys: Vec<FlowKey>) -> Self {
        Self::new(keys)
    }
}

impl From<FlowMatch> for Vec<FlowKey> {
    fn from(fm: FlowMatch) -> Self {
        fm.keys
    }
}

impl Display for FlowMatch {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.keys.iter().join(","))?;
        if self.user_space_only {
            write!(f, " (user space only)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ip_keys() -> Vec<FlowKey> {
        vec![
            FlowKey::InPort(5),
            FlowKey::EtherType(vrn_api::ETHER_TYPE_IPV4),
            FlowKey::Ipv4 {
                src: "10.0.20.6".parse().unwrap(),
                dst: "10.0.11.34".parse().unwrap(),
                proto: 1,
                tos: 0,
            },
        ]
    }

    #[test]
    fn add_key_updates_flag() {
        let mut fm = FlowMatch::new(ip_keys());
        assert!(!fm.is_user_space_only());
        fm.add_key(FlowKey::Icmp { ty: 8, code: 0 });
        assert!(!fm.is_user_space_only());
        fm.add_key(FlowKey::IcmpError { ty: 3, code: 4, data: vec![0; 28] });
        assert!(fm.is_user_space_only());
        assert_eq!(fm.len(), 5);
    }

    #[test]
    fn flag_ignored_by_eq() {
        let a = FlowMatch::new(ip_keys());
        let mut b = FlowMatch::default();
        for k in ip_keys() {
            b.add_key(k);
        }
        assert_eq!(a, b);
        assert_eq!(a.crc32(), b.crc32());
    }

    #[test]
    fn display() {
        let mut fm = FlowMatch::default();
        fm.add_key(FlowKey::InPort(5))
            .add_key(FlowKey::IcmpEcho { ty: 8, code: 0, id: 7 });
        assert_eq!(
            fm.to_string(),
            "in_port(5),icmp_echo(type=8,code=0,id=7) (user space only)"
        );
    }

    #[cfg(feature = "std")]
    #[test]
    fn decode_recomputes_flag() {
        let mut keys = ip_keys();
        keys.push(FlowKey::IcmpEcho { ty: 0, code: 0, id: 9 });
        let fm = FlowMatch::new(keys);
        let bytes = postcard::to_allocvec(&fm).unwrap();
        let back: FlowMatch = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, fm);
        assert!(back.is_user_space_only());
    }
}
