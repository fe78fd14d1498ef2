// Copyright (c) 2026 Duskboard
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Duskboard - an anonymous, distributed bulletin-board node.
//!
//! This crate implements the core of a Shingetsu-style overlay:
//! - A content-addressed [`core::record::Record`] format (stamp/id/fields,
//!   MD5 content addressing, optional Ed25519 signing).
//! - A per-thread [`core::cache::Cache`], persisted on disk, with
//!   range-based synchronisation, spam filtering, and tombstone GC.
//! - A partial-view membership overlay ([`networking::node_manager::NodeManager`])
//!   with join/bye handshakes, random-walk search, and update gossip.
//! - The wire protocol these collaborate over, served by
//!   [`networking::wire_server`], and driven outward by [`driver`].

/// Process configuration, loaded once at startup.
pub mod config;
/// Process-wide state shared by the wire server and the anti-entropy driver.
pub mod context;
/// Record model and per-thread cache store.
pub mod core;
/// The anti-entropy driver: periodic outbound sync.
pub mod driver;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// The node overlay, outbound peer talk, and the inbound wire server.
pub mod networking;
