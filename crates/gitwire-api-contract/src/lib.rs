// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! gitwire API contract types
//!
//! Shapes of every message that crosses the wire: the duplex operation
//! gateway frames (`<operation>:<phase>` events, start messages, replies)
//! and the `{data}` / error envelopes returned by short requests. Shared
//! between the server and its integration tests.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
