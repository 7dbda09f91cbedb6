// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server state management

use crate::config::ServerConfig;
use gitwire_engine::Engine;
use std::sync::Arc;

/// Shared server state
///
/// Sessions keep nothing here; every connection owns its own state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<ServerConfig>,

    /// Engine behind both short requests and the duplex gateway
    pub engine: Arc<dyn Engine>,
}

impl AppState {
    pub fn new(config: ServerConfig, engine: Arc<dyn Engine>) -> Self {
        Self {
            config: Arc::new(config),
            engine,
        }
    }
}
