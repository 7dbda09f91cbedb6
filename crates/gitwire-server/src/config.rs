// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server configuration

use crate::error::{ServerError, ServerResult};
use gitwire_engine::GitEngineConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Server configuration
///
/// Every field has a default, so a TOML file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or address to bind
    pub host: String,

    /// First port to try; `0` asks the OS for any free port
    pub port: u16,

    /// How many successive ports to try when `port` is taken
    pub port_scan_limit: u16,

    /// Allow requests from any origin
    pub enable_cors: bool,

    /// Duplex gateway deadlines
    pub gateway: GatewayConfig,

    /// Settings handed to the bundled git engine
    pub engine: GitEngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3080,
            port_scan_limit: 100,
            enable_cors: true,
            gateway: GatewayConfig::default(),
            engine: GitEngineConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a TOML file on top of the defaults
    pub fn load(path: &Path) -> ServerResult<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|err| {
            ServerError::Config(format!("{}: {err}", path.display()))
        })
    }
}

/// Deadlines applied to every duplex session. `0` disables a deadline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// How long an interactive hook waits for the client's reply
    pub reply_timeout_secs: u64,

    /// Upper bound on one whole engine invocation. On expiry the engine is
    /// asked to stop; libgit2 work halts at its next network callback.
    pub operation_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            reply_timeout_secs: 300,
            operation_timeout_secs: 3600,
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl GatewayConfig {
    pub fn reply_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.reply_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        non_zero_secs(self.operation_timeout_secs)
    }
}
