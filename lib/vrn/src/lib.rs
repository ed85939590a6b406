// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The rule matching core of the virtual network simulation.
//!
//! Two pieces live here. The [`engine::condition`] module decides
//! whether a configured rule applies to a packet being simulated
//! through the virtual topology, including connection tracking aware
//! forward/return flow clauses. The [`engine::flow_match`] module
//! describes the exact-match key under which the outcome of a
//! simulation is installed into the fast-path flow cache.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[macro_use]
extern crate alloc;

#[macro_use]
extern crate cfg_if;

pub use vrn_api as api;

#[cfg(feature = "std")]
pub mod cfg;
#[cfg(feature = "std")]
pub mod ddi;
pub mod engine;
#[cfg(feature = "std")]
pub mod print;
pub mod provider;
