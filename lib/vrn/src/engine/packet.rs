// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The packet fields observed by the simulation.
//!
//! A [`PacketDescriptor`] is a wildcard-aware record: every field is
//! optional because the simulation only knows what it has parsed. An
//! ARP frame has no IPv4 addresses, an ICMP packet has no transport
//! ports, and so on.

use super::flow_match::FlowKey;
use super::flow_match::FlowMatch;
use core::fmt;
use core::fmt::Display;
use serde::Deserialize;
use serde::Serialize;
use vrn_api::ETHER_TYPE_IPV4;
use vrn_api::Ipv4Addr;
use vrn_api::MacAddr;
use vrn_api::Protocol;

pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMP_ECHO_REQUEST: u8 = 8;

/// The packet fields a [`Condition`] is evaluated against.
///
/// For ICMP the transport source and destination carry the ICMP type
/// and code respectively, and `icmp_id` carries the echo identifier.
///
/// [`Condition`]: super::condition::Condition
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize,
)]
pub struct PacketDescriptor {
    /// The datapath port number the packet arrived on.
    pub in_port: Option<u32>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub ether_type: Option<u16>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub nw_proto: Option<u8>,
    pub nw_tos: Option<u8>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
    pub icmp_id: Option<u16>,
}

impl PacketDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_in_port(mut self, port: u32) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn with_dl_src(mut self, mac: MacAddr) -> Self {
        self.dl_src = Some(mac);
        self
    }

    pub fn with_dl_dst(mut self, mac: MacAddr) -> Self {
        self.dl_dst = Some(mac);
        self
    }

    pub fn with_ether_type(mut self, ether_type: u16) -> Self {
        self.ether_type = Some(ether_type);
        self
    }

    pub fn with_nw_src(mut self, ip: Ipv4Addr) -> Self {
        self.nw_src = Some(ip);
        self
    }

    pub fn with_nw_dst(mut self, ip: Ipv4Addr) -> Self {
        self.nw_dst = Some(ip);
        self
    }

    pub fn with_nw_proto(mut self, proto: u8) -> Self {
        self.nw_proto = Some(proto);
        self
    }

    pub fn with_nw_tos(mut self, tos: u8) -> Self {
        self.nw_tos = Some(tos);
        self
    }

    pub fn with_tp_src(mut self, port: u16) -> Self {
        self.tp_src = Some(port);
        self
    }

    pub fn with_tp_dst(mut self, port: u16) -> Self {
        self.tp_dst = Some(port);
        self
    }

    pub fn with_icmp_id(mut self, id: u16) -> Self {
        self.icmp_id = Some(id);
        self
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.nw_proto.map(Protocol::from)
    }

    pub fn is_ipv4(&self) -> bool {
        self.ether_type == Some(ETHER_TYPE_IPV4)
    }

    /// Return the flow signature of this packet, if it is an IPv4 TCP
    /// or UDP packet with every 5-tuple field known.
    pub fn flow_sig(&self) -> Option<FlowSig> {
        if !self.is_ipv4() {
            return None;
        }

        let proto = self.protocol()?;
        if !proto.has_ports() {
            return None;
        }

        Some(FlowSig {
            proto,
            src: self.nw_src?,
            dst: self.nw_dst?,
            src_port: self.tp_src?,
            dst_port: self.tp_dst?,
        })
    }

    /// Build the exact match describing every known field of this
    /// packet.
    ///
    /// Keys are emitted outermost first: ingress port, Ethernet
    /// addresses, EtherType, IPv4, then the ULP. An ICMP echo carrying
    /// an identifier produces an [`FlowKey::IcmpEcho`], which can only
    /// be matched in software.
    pub fn to_flow_match(&self) -> FlowMatch {
        let mut fm = FlowMatch::default();

        if let Some(port) = self.in_port {
            fm.add_key(FlowKey::InPort(port));
        }

        if let (Some(src), Some(dst)) = (self.dl_src, self.dl_dst) {
            fm.add_key(FlowKey::Ethernet { src, dst });
        }

        if let Some(et) = self.ether_type {
            fm.add_key(FlowKey::EtherType(et));
        }

        if !self.is_ipv4() {
            return fm;
        }

        let (Some(src), Some(dst), Some(proto)) =
            (self.nw_src, self.nw_dst, self.nw_proto)
        else {
            return fm;
        };

        fm.add_key(FlowKey::Ipv4 {
            src,
            dst,
            proto,
            tos: self.nw_tos.unwrap_or(0),
        });

        match (Protocol::from(proto), self.tp_src, self.tp_dst) {
            (Protocol::TCP, Some(src), Some(dst)) => {
                fm.add_key(FlowKey::Tcp { src, dst });
            }

            (Protocol::UDP, Some(src), Some(dst)) => {
                fm.add_key(FlowKey::Udp { src, dst });
            }

            (Protocol::ICMP, Some(ty), Some(code)) => {
                // ICMP type and code are single octets riding in the
                // transport port fields. Anything wider is not ICMP we
                // can describe.
                let (Ok(ty), Ok(code)) = (u8::try_from(ty), u8::try_from(code))
                else {
                    return fm;
                };
                match self.icmp_id {
                    Some(id)
                        if ty == ICMP_ECHO_REQUEST || ty == ICMP_ECHO_REPLY =>
                    {
                        fm.add_key(FlowKey::IcmpEcho { ty, code, id });
                    }

                    _ => {
                        fm.add_key(FlowKey::Icmp { ty, code });
                    }
                }
            }

            _ => (),
        }

        fm
    }
}

/// The IPv4 5-tuple of a connection tracked flow.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
pub struct FlowSig {
    pub proto: Protocol,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowSig {
    /// Swap IP source and destination as well as ULP port source and
    /// destination.
    pub fn mirror(self) -> Self {
        Self {
            proto: self.proto,
            src: self.dst,
            dst: self.src,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

impl Display for FlowSig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}|{}:{}|{}:{}",
            u8::from(self.proto),
            self.src,
            self.src_port,
            self.dst,
            self.dst_port,
        )
    }
}
