// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Shared pieces of the engine benchmarks.

use criterion::measurement::Measurement;
use criterion::measurement::WallTime;
use rand::Rng;
use std::collections::BTreeSet;
use vrn::api::ConfigError;
use vrn_test_utils::Condition;
use vrn_test_utils::Ipv4Prefix;
use vrn_test_utils::PortId;
use vrn_test_utils::random_port_id;

#[cfg(feature = "alloc")]
pub mod alloc;

/// Additional labelling information for [`Measurement`]s for
/// pretty-printing and grouping.
pub trait MeasurementInfo: Measurement {
    fn label() -> &'static str;
}

impl MeasurementInfo for WallTime {
    fn label() -> &'static str {
        "wallclock"
    }
}

/// A condition exercising every stateless clause, satisfied by the
/// canonical test packet when its ingress port is in `in_ports`.
pub fn busy_condition(
    in_ports: &BTreeSet<PortId>,
) -> Result<Condition, ConfigError> {
    Ok(Condition {
        in_port_ids: Some(in_ports.clone()),
        nw_tos: Some(34),
        nw_proto: Some(6),
        nw_src_ip: Some(Ipv4Prefix::new_checked([10, 0, 0, 0].into(), 8)?),
        nw_dst_ip: Some(Ipv4Prefix::new_checked([10, 0, 11, 0].into(), 24)?),
        tp_src_start: 1024,
        tp_dst_start: 1234,
        tp_dst_end: 1234,
        ..Default::default()
    })
}

/// A random set of `n` ports.
pub fn random_ports(n: usize) -> BTreeSet<PortId> {
    (0..n).map(|_| random_port_id()).collect()
}

/// A random transport port above the well-known range.
pub fn random_ephemeral_port() -> u16 {
    rand::rng().random_range(1024..=u16::MAX)
}
