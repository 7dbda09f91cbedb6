// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Failures reported in a terminal `done` event

use gitwire_api_contract::ErrorEnvelope;
use gitwire_engine::EngineError;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Operation did not finish within {}s", .0.as_secs())]
    OperationTimeout(Duration),

    #[error("Engine task failed: {0}")]
    EngineAborted(String),
}

impl GatewayError {
    pub fn code(&self) -> String {
        match self {
            GatewayError::Engine(err) => err.code(),
            GatewayError::OperationTimeout(_) => "OperationTimeout".to_string(),
            GatewayError::EngineAborted(_) => "InternalError".to_string(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            GatewayError::Engine(err) => err.name(),
            GatewayError::OperationTimeout(_) => "TimeoutError".to_string(),
            GatewayError::EngineAborted(_) => "Error".to_string(),
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.to_string(), self.code(), self.name())
    }
}
