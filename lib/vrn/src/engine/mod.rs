// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The rule matching engine.
//!
//! Everything under this namespace builds without `std`, save for the
//! in-memory connection tracking cache.
pub mod condition;
pub mod conn_track;
pub mod context;
pub mod flow_match;
pub mod packet;
pub mod predicate;

pub use condition::Condition;
pub use conn_track::CacheError;
pub use conn_track::ConnTrackCache;
pub use context::EvalContext;
pub use context::FlowState;
pub use flow_match::FlowKey;
pub use flow_match::FlowMatch;
pub use packet::PacketDescriptor;
