// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Rule conditions.
//!
//! A [`Condition`] is the conjunction of independent clauses, each of
//! which may be inverted on its own, with the whole conjunction
//! optionally inverted on top. A clause whose field is not configured
//! imposes no restriction, and its invert flag is ignored. This is
//! distinct from a configured clause which happens to match every
//! packet, such as a zero-length prefix: that clause is still subject
//! to its invert flag.
//!
//! Transport port ranges are always configured. They default to the
//! full port space.

use super::conn_track::CacheError;
use super::context::EvalContext;
use super::context::FlowState;
use super::packet::PacketDescriptor;
use super::predicate::MatchExact;
use super::predicate::MatchPrefix;
use super::predicate::clause;
use super::predicate::is_full_port_range;
use super::predicate::port_range_clause;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::fmt::Display;
use itertools::Itertools;
use serde::Deserialize;
use serde::Serialize;
use vrn_api::GroupId;
use vrn_api::Ipv4Prefix;
use vrn_api::PortId;

/// A rule predicate.
///
/// Conditions are immutable once published and carry no interior
/// state; any number of threads may evaluate the same condition
/// against their own [`EvalContext`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct Condition {
    pub conjunction_inv: bool,

    pub in_port_ids: Option<BTreeSet<PortId>>,
    pub in_port_inv: bool,

    /// The egress ports. See [`Condition::matches()`] for how this
    /// clause behaves on a port filter.
    pub out_port_ids: Option<BTreeSet<PortId>>,
    pub out_port_inv: bool,

    /// Matched against the groups of the ingress port.
    pub port_group: Option<GroupId>,
    pub port_group_inv: bool,

    pub nw_tos: Option<u8>,
    pub nw_tos_inv: bool,

    pub nw_proto: Option<u8>,
    pub nw_proto_inv: bool,

    pub nw_src_ip: Option<Ipv4Prefix>,
    pub nw_src_inv: bool,

    pub nw_dst_ip: Option<Ipv4Prefix>,
    pub nw_dst_inv: bool,

    pub tp_src_start: u16,
    pub tp_src_end: u16,
    pub tp_src_inv: bool,

    pub tp_dst_start: u16,
    pub tp_dst_end: u16,
    pub tp_dst_inv: bool,

    pub match_forward_flow: bool,
    pub match_return_flow: bool,
}

impl Default for Condition {
    fn default() -> Self {
        Self {
            conjunction_inv: false,
            in_port_ids: None,
            in_port_inv: false,
            out_port_ids: None,
            out_port_inv: false,
            port_group: None,
            port_group_inv: false,
            nw_tos: None,
            nw_tos_inv: false,
            nw_proto: None,
            nw_proto_inv: false,
            nw_src_ip: None,
            nw_src_inv: false,
            nw_dst_ip: None,
            nw_dst_inv: false,
            tp_src_start: 0,
            tp_src_end: u16::MAX,
            tp_src_inv: false,
            tp_dst_start: 0,
            tp_dst_end: u16::MAX,
            tp_dst_inv: false,
            match_forward_flow: false,
            match_return_flow: false,
        }
    }
}

/// A configuration which is legal but almost certainly not what the
/// author intended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Lint {
    /// A transport port range whose start exceeds its end. It matches
    /// no packet.
    EmptyTpSrcRange,
    EmptyTpDstRange,

    /// Both flow directions requested at once. No packet is in both.
    BothFlowDirections,

    /// An empty port set. It matches no packet.
    EmptyInPorts,
    EmptyOutPorts,
}

impl Display for Lint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::EmptyTpSrcRange => "tp_src range is empty",
            Self::EmptyTpDstRange => "tp_dst range is empty",
            Self::BothFlowDirections => {
                "both forward and return flow requested"
            }
            Self::EmptyInPorts => "in_port set is empty",
            Self::EmptyOutPorts => "out_port set is empty",
        };
        write!(f, "{s}")
    }
}

impl Condition {
    /// A condition which matches every packet.
    pub fn match_any() -> Self {
        Self::default()
    }

    /// Does this condition match every packet without consulting
    /// connection tracking?
    ///
    /// Invert flags of unconfigured clauses don't count.
    pub fn is_match_any(&self) -> bool {
        !self.conjunction_inv
            && self.in_port_ids.is_none()
            && self.out_port_ids.is_none()
            && self.port_group.is_none()
            && self.nw_tos.is_none()
            && self.nw_proto.is_none()
            && self.nw_src_ip.is_none()
            && self.nw_dst_ip.is_none()
            && is_full_port_range(self.tp_src_start, self.tp_src_end)
            && !self.tp_src_inv
            && is_full_port_range(self.tp_dst_start, self.tp_dst_end)
            && !self.tp_dst_inv
            && !self.needs_flow_state()
    }

    /// Does evaluating this condition require the connection tracking
    /// state of the packet?
    pub fn needs_flow_state(&self) -> bool {
        self.match_forward_flow || self.match_return_flow
    }

    /// Evaluate the condition.
    ///
    /// `is_port_filter` is true when the condition is attached directly
    /// to a port as its output filter, rather than being evaluated by
    /// a forwarding element. In that case a configured `out_port_ids`
    /// clause yields `out_port_inv` as is, without consulting the
    /// membership of the egress port.
    ///
    /// The flow state is only looked up when the condition asks for a
    /// flow direction and every other clause is satisfied. The lookup
    /// happens at most once per context.
    ///
    /// # Errors
    ///
    /// A failure of the connection tracking cache is returned as is.
    pub fn matches(
        &self,
        ctx: &mut EvalContext,
        pkt: &PacketDescriptor,
        is_port_filter: bool,
    ) -> Result<bool, CacheError> {
        if !self.stateless_matches(ctx, pkt, is_port_filter) {
            return Ok(self.conjunction_inv);
        }

        if self.needs_flow_state() {
            let state = ctx.flow_state(pkt)?;
            if !self.flow_matches(state) {
                return Ok(self.conjunction_inv);
            }
        }

        Ok(!self.conjunction_inv)
    }

    /// Evaluate the condition, reading the connection tracking cache
    /// without blocking.
    ///
    /// Identical in result to [`Condition::matches()`].
    pub async fn matches_async(
        &self,
        ctx: &mut EvalContext,
        pkt: &PacketDescriptor,
        is_port_filter: bool,
    ) -> Result<bool, CacheError> {
        if !self.stateless_matches(ctx, pkt, is_port_filter) {
            return Ok(self.conjunction_inv);
        }

        if self.needs_flow_state() {
            let state = ctx.flow_state_async(pkt).await?;
            if !self.flow_matches(state) {
                return Ok(self.conjunction_inv);
            }
        }

        Ok(!self.conjunction_inv)
    }

    /// Report configurations that are accepted but match nothing.
    pub fn lint(&self) -> Vec<Lint> {
        let mut lints = vec![];

        if self.in_port_ids.as_ref().is_some_and(BTreeSet::is_empty) {
            lints.push(Lint::EmptyInPorts);
        }

        if self.out_port_ids.as_ref().is_some_and(BTreeSet::is_empty) {
            lints.push(Lint::EmptyOutPorts);
        }

        if self.tp_src_start > self.tp_src_end {
            lints.push(Lint::EmptyTpSrcRange);
        }

        if self.tp_dst_start > self.tp_dst_end {
            lints.push(Lint::EmptyTpDstRange);
        }

        if self.match_forward_flow && self.match_return_flow {
            lints.push(Lint::BothFlowDirections);
        }

        lints
    }

    /// The configured clauses, rendered one per element.
    pub fn clauses(&self) -> Vec<String> {
        fn inv(flag: bool) -> &'static str {
            if flag { "!" } else { "" }
        }

        let mut out = vec![];

        if let Some(ids) = &self.in_port_ids {
            out.push(format!(
                "{}in_port=[{}]",
                inv(self.in_port_inv),
                ids.iter().join(",")
            ));
        }

        if let Some(ids) = &self.out_port_ids {
            out.push(format!(
                "{}out_port=[{}]",
                inv(self.out_port_inv),
                ids.iter().join(",")
            ));
        }

        if let Some(group) = &self.port_group {
            out.push(format!("{}port_group={group}", inv(self.port_group_inv)));
        }

        if let Some(tos) = self.nw_tos {
            out.push(format!("{}nw_tos={tos}", inv(self.nw_tos_inv)));
        }

        if let Some(proto) = self.nw_proto {
            out.push(format!("{}nw_proto={proto}", inv(self.nw_proto_inv)));
        }

        if let Some(src) = &self.nw_src_ip {
            out.push(format!("{}nw_src={src}", inv(self.nw_src_inv)));
        }

        if let Some(dst) = &self.nw_dst_ip {
            out.push(format!("{}nw_dst={dst}", inv(self.nw_dst_inv)));
        }

        if !is_full_port_range(self.tp_src_start, self.tp_src_end)
            || self.tp_src_inv
        {
            out.push(format!(
                "{}tp_src={}..={}",
                inv(self.tp_src_inv),
                self.tp_src_start,
                self.tp_src_end
            ));
        }

        if !is_full_port_range(self.tp_dst_start, self.tp_dst_end)
            || self.tp_dst_inv
        {
            out.push(format!(
                "{}tp_dst={}..={}",
                inv(self.tp_dst_inv),
                self.tp_dst_start,
                self.tp_dst_end
            ));
        }

        if self.match_forward_flow {
            out.push(String::from("fwd_flow"));
        }

        if self.match_return_flow {
            out.push(String::from("ret_flow"));
        }

        out
    }

    fn stateless_matches(
        &self,
        ctx: &EvalContext,
        pkt: &PacketDescriptor,
        is_port_filter: bool,
    ) -> bool {
        clause(self.in_port_ids.as_ref(), self.in_port_inv, |ids| {
            ctx.in_port().is_some_and(|p| ids.contains(&p))
        }) && self.out_port_clause(ctx, is_port_filter)
            && clause(self.port_group, self.port_group_inv, |g| {
                ctx.in_port_groups().contains(&g)
            })
            && clause(self.nw_tos, self.nw_tos_inv, |tos| {
                pkt.nw_tos.is_some_and(|t| t.match_exact(&tos))
            })
            && clause(self.nw_proto, self.nw_proto_inv, |proto| {
                pkt.nw_proto.is_some_and(|p| p.match_exact(&proto))
            })
            && clause(self.nw_src_ip, self.nw_src_inv, |prefix| {
                prefix.prefix_len() == 0
                    || pkt.nw_src.is_some_and(|ip| ip.match_prefix(&prefix))
            })
            && clause(self.nw_dst_ip, self.nw_dst_inv, |prefix| {
                prefix.prefix_len() == 0
                    || pkt.nw_dst.is_some_and(|ip| ip.match_prefix(&prefix))
            })
            && port_range_clause(
                pkt.tp_src,
                self.tp_src_start,
                self.tp_src_end,
                self.tp_src_inv,
            )
            && port_range_clause(
                pkt.tp_dst,
                self.tp_dst_start,
                self.tp_dst_end,
                self.tp_dst_inv,
            )
    }

    fn out_port_clause(&self, ctx: &EvalContext, is_port_filter: bool) -> bool {
        let Some(ids) = &self.out_port_ids else {
            return true;
        };

        // A port filter is attached to the egress port itself, so the
        // membership test is implied and only the invert flag remains.
        if is_port_filter {
            return self.out_port_inv;
        }

        ctx.out_port().is_some_and(|p| ids.contains(&p)) ^ self.out_port_inv
    }

    fn flow_matches(&self, state: FlowState) -> bool {
        if self.match_forward_flow && state != FlowState::Forward {
            return false;
        }

        if self.match_return_flow && state != FlowState::Return {
            return false;
        }

        true
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let clauses = self.clauses();
        let body = if clauses.is_empty() {
            String::from("*")
        } else {
            clauses.join(" ")
        };

        if self.conjunction_inv {
            write!(f, "!({body})")
        } else {
            write!(f, "{body}")
        }
    }
}
