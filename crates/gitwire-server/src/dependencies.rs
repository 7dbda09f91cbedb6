// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Dependency wiring for the server

use crate::{config::ServerConfig, state::AppState};
use gitwire_engine::{Engine, GitEngine, PathResolver};
use std::sync::Arc;
use tracing::info;

/// Default dependency builder: the libgit2 engine with host detection
pub struct DefaultServerDependencies {
    state: AppState,
}

impl DefaultServerDependencies {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_resolver(config, PathResolver::detect())
    }

    /// Same as [`new`](Self::new) with a fixed host environment
    pub fn with_resolver(config: ServerConfig, resolver: PathResolver) -> Self {
        info!(host_environment = %resolver.host(), "Resolved host environment");
        let engine: Arc<dyn Engine> = Arc::new(GitEngine::new(config.engine.clone(), resolver));
        Self {
            state: AppState::new(config, engine),
        }
    }

    /// Consume the dependency builder and return the resulting app state
    pub fn into_state(self) -> AppState {
        self.state
    }
}
