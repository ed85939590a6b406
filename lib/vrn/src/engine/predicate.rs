// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The primitive tests a [`Condition`] is built from.
//!
//! [`Condition`]: super::condition::Condition

use vrn_api::Ipv4Addr;
use vrn_api::Ipv4Prefix;

/// A marker trait for types that can be matched exactly, usually by direct
/// equality comparison.
pub trait MatchExactVal {}

/// Trait support matching a value exactly, usually by direct equality
/// comparison.
pub trait MatchExact<M: MatchExactVal + Eq + PartialEq> {
    fn match_exact(&self, val: &M) -> bool;
}

/// A marker trait for types that can be match by prefix.
pub trait MatchPrefixVal {}

/// A trait describing how to match data by prefix.
pub trait MatchPrefix<M: MatchPrefixVal> {
    fn match_prefix(&self, prefix: &M) -> bool;
}

/// A marker trait for types that can match a range of values.
pub trait MatchRangeVal {}

/// A trait describing how to match data over a range of values.
pub trait MatchRange<M: MatchRangeVal> {
    fn match_range(&self, start: &M, end: &M) -> bool;
}

impl MatchExactVal for u8 {}

impl MatchExact<u8> for u8 {
    fn match_exact(&self, val: &u8) -> bool {
        *self == *val
    }
}

impl MatchPrefixVal for Ipv4Prefix {}

impl MatchPrefix<Ipv4Prefix> for Ipv4Addr {
    fn match_prefix(&self, prefix: &Ipv4Prefix) -> bool {
        prefix.is_member(*self)
    }
}

impl MatchRangeVal for u16 {}

impl MatchRange<u16> for u16 {
    /// Both ends are inclusive. A range whose start is greater than
    /// its end matches nothing.
    fn match_range(&self, start: &u16, end: &u16) -> bool {
        *start <= *self && *self <= *end
    }
}

/// Evaluate one invertible clause.
///
/// A clause which is not configured imposes no restriction: it is
/// satisfied, and its invert flag is ignored. A configured clause
/// yields `raw XOR inv`.
#[inline]
pub fn clause<C, F>(cfg: Option<C>, inv: bool, raw: F) -> bool
where
    F: FnOnce(C) -> bool,
{
    match cfg {
        None => true,
        Some(c) => raw(c) ^ inv,
    }
}

/// Is `start..=end` the full transport port space?
#[inline]
pub const fn is_full_port_range(start: u16, end: u16) -> bool {
    start == 0 && end == u16::MAX
}

/// Evaluate a transport port range clause against a packet port.
///
/// Ranges are always present, and so always subject to `inv`. The
/// full range matches even a packet with no transport port at all.
pub fn port_range_clause(
    port: Option<u16>,
    start: u16,
    end: u16,
    inv: bool,
) -> bool {
    let raw = is_full_port_range(start, end)
        || port.is_some_and(|p| p.match_range(&start, &end));
    raw ^ inv
}
