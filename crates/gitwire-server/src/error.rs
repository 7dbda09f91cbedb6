// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server error types and the short-request error envelope

use axum::{
    Json,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use gitwire_api_contract::RequestErrorEnvelope;
use gitwire_engine::EngineError;
use serde_json::Value;
use tracing::{error, warn};

/// Server result type
pub type ServerResult<T> = Result<T, ServerError>;

/// Server error types
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No free port between {first} and {last}")]
    NoFreePort { first: u16, last: u16 },

    #[error("Invalid request body: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Engine(err) => {
                StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error class reported as `error` in the envelope
    pub fn name(&self) -> String {
        match self {
            ServerError::BadRequest(_) => "BadRequestError".to_string(),
            ServerError::Engine(err) => err.name(),
            _ => "Error".to_string(),
        }
    }

    pub fn code(&self) -> Option<String> {
        match self {
            ServerError::Engine(err) => Some(err.code()),
            _ => None,
        }
    }

    pub fn data(&self) -> Option<Value> {
        match self {
            ServerError::Engine(err) => err.data(),
            _ => None,
        }
    }
}

/// A failed short request, with enough context to build its envelope
#[derive(Debug)]
pub struct RequestError {
    pub path: String,
    pub method: Method,
    /// Engine command that failed, `git.<command>`
    pub caller: Option<String>,
    pub error: ServerError,
}

impl RequestError {
    pub fn to_envelope(&self) -> RequestErrorEnvelope {
        RequestErrorEnvelope {
            path: self.path.clone(),
            method: self.method.to_string(),
            status: self.error.status().as_u16(),
            error: self.error.name(),
            caller: self.caller.clone(),
            data: self.error.data(),
            message: self.error.to_string(),
            code: self.error.code(),
            details: None,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let envelope = self.to_envelope();
        let status = self.error.status();
        if status.is_server_error() {
            error!(
                path = %envelope.path,
                method = %envelope.method,
                caller = ?envelope.caller,
                error = %self.error,
                "Request failed"
            );
        } else {
            warn!(
                path = %envelope.path,
                method = %envelope.method,
                caller = ?envelope.caller,
                code = ?envelope.code,
                error = %self.error,
                "Request rejected"
            );
        }
        (status, Json(envelope)).into_response()
    }
}
