// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The per-packet evaluation context.

use super::conn_track::CacheError;
use super::conn_track::ConnTrackCache;
use super::conn_track::ConnTrackKey;
use super::conn_track::RETURN_FLOW_MARKER;
use super::packet::FlowSig;
use super::packet::PacketDescriptor;
use crate::provider::LogLevel;
use crate::provider::LogProvider;
use crate::provider::NullLog;
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::fmt::Display;
use vrn_api::DeviceId;
use vrn_api::GroupId;
use vrn_api::PortId;

/// The connection tracking state of the packet under evaluation.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum FlowState {
    /// Not yet looked up.
    #[default]
    Untracked,
    Forward,
    Return,
}

impl Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Untracked => "UNTRACKED",
            Self::Forward => "FORWARD",
            Self::Return => "RETURN",
        };
        write!(f, "{s}")
    }
}

/// Everything a [`Condition`] needs to know about the packet's path
/// through the topology, beyond the packet itself.
///
/// A context belongs to exactly one in-flight simulation. The flow
/// state is looked up at most once and then memoized, no matter how
/// many conditions ask for it.
///
/// [`Condition`]: super::condition::Condition
pub struct EvalContext {
    device: DeviceId,
    in_port: Option<PortId>,
    out_port: Option<PortId>,
    in_port_groups: BTreeSet<GroupId>,
    cache: Arc<dyn ConnTrackCache>,
    log: Arc<dyn LogProvider>,
    flow_state: FlowState,
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("device", &self.device)
            .field("in_port", &self.in_port)
            .field("out_port", &self.out_port)
            .field("in_port_groups", &self.in_port_groups)
            .field("flow_state", &self.flow_state)
            .finish_non_exhaustive()
    }
}

impl EvalContext {
    /// Create a context for a packet being simulated through `device`.
    pub fn new(device: DeviceId, cache: Arc<dyn ConnTrackCache>) -> Self {
        Self {
            device,
            in_port: None,
            out_port: None,
            in_port_groups: BTreeSet::new(),
            cache,
            log: Arc::new(NullLog),
            flow_state: FlowState::Untracked,
        }
    }

    pub fn with_in_port(mut self, port: PortId) -> Self {
        self.in_port = Some(port);
        self
    }

    pub fn with_out_port(mut self, port: PortId) -> Self {
        self.out_port = Some(port);
        self
    }

    /// Set the groups the ingress port belongs to.
    pub fn with_in_port_groups<I>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = GroupId>,
    {
        self.in_port_groups = groups.into_iter().collect();
        self
    }

    pub fn with_log(mut self, log: Arc<dyn LogProvider>) -> Self {
        self.log = log;
        self
    }

    pub fn set_in_port(&mut self, port: Option<PortId>) {
        self.in_port = port;
    }

    /// The egress port is typically learned part way through the
    /// simulation, after some conditions have already been evaluated.
    pub fn set_out_port(&mut self, port: Option<PortId>) {
        self.out_port = port;
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn in_port(&self) -> Option<PortId> {
        self.in_port
    }

    pub fn out_port(&self) -> Option<PortId> {
        self.out_port
    }

    pub fn in_port_groups(&self) -> &BTreeSet<GroupId> {
        &self.in_port_groups
    }

    /// Has the flow state of this packet been determined?
    pub fn is_conn_tracked(&self) -> bool {
        self.flow_state != FlowState::Untracked
    }

    /// Return the flow state of `pkt`, consulting the cache with a
    /// blocking, expiry-refreshing read on first use.
    pub fn flow_state(
        &mut self,
        pkt: &PacketDescriptor,
    ) -> Result<FlowState, CacheError> {
        if self.is_conn_tracked() {
            return Ok(self.flow_state);
        }

        let Some(sig) = pkt.flow_sig() else {
            return Ok(self.untrackable());
        };

        let key = ConnTrackKey::new(self.device, &sig);
        let val = self
            .cache
            .get_and_touch(key.as_str())
            .map_err(|e| self.cache_failure(&key, e))?;
        self.classify(&sig, val)
    }

    /// Return the flow state of `pkt`, consulting the cache with a
    /// non-blocking, expiry-refreshing read on first use.
    pub async fn flow_state_async(
        &mut self,
        pkt: &PacketDescriptor,
    ) -> Result<FlowState, CacheError> {
        if self.is_conn_tracked() {
            return Ok(self.flow_state);
        }

        let Some(sig) = pkt.flow_sig() else {
            return Ok(self.untrackable());
        };

        let key = ConnTrackKey::new(self.device, &sig);
        let val = self
            .cache
            .get_and_touch_async(key.as_str())
            .await
            .map_err(|e| self.cache_failure(&key, e))?;
        self.classify(&sig, val)
    }

    pub fn is_forward_flow(
        &mut self,
        pkt: &PacketDescriptor,
    ) -> Result<bool, CacheError> {
        Ok(self.flow_state(pkt)? == FlowState::Forward)
    }

    // Only IPv4 TCP and UDP are tracked; anything else is always
    // treated as the forward direction.
    fn untrackable(&mut self) -> FlowState {
        self.flow_state = FlowState::Forward;
        self.flow_state
    }

    fn classify(
        &mut self,
        sig: &FlowSig,
        val: Option<String>,
    ) -> Result<FlowState, CacheError> {
        if val.as_deref() == Some(RETURN_FLOW_MARKER) {
            self.flow_state = FlowState::Return;
            return Ok(self.flow_state);
        }

        let rev = ConnTrackKey::reverse(self.device, sig);
        self.cache
            .set(rev.as_str(), RETURN_FLOW_MARKER)
            .map_err(|e| self.cache_failure(&rev, e))?;
        self.flow_state = FlowState::Forward;
        Ok(self.flow_state)
    }

    fn cache_failure(&self, key: &ConnTrackKey, err: CacheError) -> CacheError {
        self.log.log(LogLevel::Warn, &format!("conn track {key}: {err}"));
        err
    }
}
