// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! gitwire server
//!
//! Exposes git repository operations to remote clients: short commands as
//! `POST /git/<command>` requests answered with `{data}`, and long-running
//! operations (clone, fetch, push, pull, checkout, remote listing) as
//! WebSocket sessions that stream progress and ask the client for
//! credentials, signatures and merge resolutions along the way.

pub mod config;
pub mod dependencies;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod server;
pub mod state;

pub use config::{GatewayConfig, ServerConfig};
pub use error::{RequestError, ServerError, ServerResult};
pub use server::Server;
pub use state::AppState;
