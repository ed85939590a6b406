// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Value types shared between the rule configuration surface and the
//! matching engine.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

use alloc::string::String;
use thiserror::Error;

pub mod id;
pub mod ip;
pub mod mac;

pub use id::*;
pub use ip::*;
pub use mac::*;

/// The overall version of the API. Anytime a serialized type in this
/// crate (or the `Condition` type in the engine) is added, removed,
/// or modified, this number should increment. Stored rule
/// configuration carries no version of its own, so this is the only
/// means of detecting a mismatch between writer and reader.
pub const API_VERSION: u64 = 3;

pub const ETHER_TYPE_IPV4: u16 = 0x0800;
pub const ETHER_TYPE_ARP: u16 = 0x0806;
pub const ETHER_TYPE_VLAN: u16 = 0x8100;
pub const ETHER_TYPE_IPV6: u16 = 0x86DD;

/// Errors raised while validating rule configuration.
///
/// These are produced at configuration (or deserialization) time. A
/// value which made it past validation is never re-checked during
/// evaluation.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum ConfigError {
    #[error("bad IPv4 prefix length: {0}")]
    BadPrefixLen(u8),

    #[error("bad IPv4 address: {0}")]
    BadAddr(String),

    #[error("bad MAC address: {0}")]
    BadMac(String),

    #[error("bad port range: {0}")]
    BadPortRange(String),

    #[error("bad identifier: {0}")]
    BadId(String),
}
