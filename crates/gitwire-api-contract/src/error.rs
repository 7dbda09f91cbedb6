// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types and error envelopes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding inbound frames
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The only error information a terminal `done` event carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    pub name: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
            name: name.into(),
        }
    }
}

/// Body of a failed short request
///
/// `path` is the original request URI and `caller` names the engine command
/// that failed (`git.<command>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestErrorEnvelope {
    pub path: String,
    pub method: String,
    pub status: u16,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub caller: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub details: Option<Value>,
}
