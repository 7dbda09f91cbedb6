// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine and hook error types

use crate::paths::PathError;
use serde_json::{Value, json};
use std::time::Duration;
use thiserror::Error;

/// Failure of a hook that waited on the client
#[derive(Debug, Clone, Error)]
pub enum HookError {
    #[error("Failed to decode reply: {0}")]
    Decode(String),

    #[error("No reply received within {}s", .0.as_secs())]
    ReplyTimeout(Duration),

    #[error("Connection closed before a reply arrived")]
    ChannelClosed,
}

impl HookError {
    pub fn code(&self) -> &'static str {
        match self {
            HookError::Decode(_) => "ReplyDecodeError",
            HookError::ReplyTimeout(_) => "ReplyTimeout",
            HookError::ChannelClosed => "ConnectionClosed",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HookError::Decode(_) => "SyntaxError",
            HookError::ReplyTimeout(_) => "TimeoutError",
            HookError::ChannelClosed => "ConnectionClosedError",
        }
    }
}

/// Errors raised by the engine or before it runs
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Operation not supported by this engine: {0}")]
    Unsupported(String),

    #[error("The function requires a \"{0}\" parameter but none was provided.")]
    MissingParameter(&'static str),

    #[error("Invalid \"{name}\" parameter: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Invalid reply to {hook}: {reason}")]
    InvalidReply { hook: &'static str, reason: String },

    #[error("Could not find {0}.")]
    NotFound(String),

    #[error("The operation was canceled.")]
    UserCanceled,

    #[error("Authentication failed for {url} after {attempts} attempts")]
    AuthFailed { url: String, attempts: u32 },

    #[error("Automatic merge failed with conflicts in: {}", .0.join(", "))]
    MergeConflict(Vec<String>),

    #[error("A simple fast-forward merge was not possible.")]
    FastForwardRequired,

    #[error("Push rejected: {}", format_rejections(.0))]
    PushRejected(Vec<(String, String)>),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("{0}")]
    Git(#[from] git2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine task failed: {0}")]
    Join(String),
}

fn format_rejections(rejections: &[(String, String)]) -> String {
    rejections
        .iter()
        .map(|(reference, reason)| format!("{reference} ({reason})"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl EngineError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        EngineError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> String {
        match self {
            EngineError::Path(err) => err.code().to_string(),
            EngineError::UnknownOperation(_) => "UnknownOperation".into(),
            EngineError::Unsupported(_) => "NotSupportedError".into(),
            EngineError::MissingParameter(_) => "MissingParameterError".into(),
            EngineError::InvalidParameter { .. } => "InvalidParameterError".into(),
            EngineError::InvalidReply { .. } => "InvalidReplyError".into(),
            EngineError::NotFound(_) => "NotFoundError".into(),
            EngineError::UserCanceled => "UserCanceledError".into(),
            EngineError::AuthFailed { .. } => "HttpError".into(),
            EngineError::MergeConflict(_) => "MergeConflictError".into(),
            EngineError::FastForwardRequired => "FastForwardError".into(),
            EngineError::PushRejected(_) => "PushRejectedError".into(),
            EngineError::Hook(err) => err.code().to_string(),
            EngineError::Git(err) if err.code() == git2::ErrorCode::NotFound => {
                "NotFoundError".into()
            }
            EngineError::Git(err) => format!("{:?}Error", err.class()),
            EngineError::Io(_) => "IoError".into(),
            EngineError::Join(_) => "InternalError".into(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            EngineError::Path(err) => err.code().to_string(),
            EngineError::Hook(err) => err.name().to_string(),
            EngineError::Git(err) if err.code() != git2::ErrorCode::NotFound => "GitError".into(),
            EngineError::Io(_) | EngineError::Join(_) => "Error".into(),
            _ => self.code(),
        }
    }

    /// Structured detail for the error envelope
    pub fn data(&self) -> Option<Value> {
        match self {
            EngineError::Path(err) => Some(err.data()),
            EngineError::MissingParameter(parameter) => Some(json!({ "parameter": parameter })),
            EngineError::InvalidParameter { name, .. } => Some(json!({ "parameter": name })),
            EngineError::NotFound(what) => Some(json!({ "what": what })),
            EngineError::AuthFailed { url, attempts } => {
                Some(json!({ "url": url, "attempts": attempts }))
            }
            EngineError::MergeConflict(filepaths) => Some(json!({ "filepaths": filepaths })),
            EngineError::PushRejected(rejections) => Some(Value::Object(
                rejections
                    .iter()
                    .map(|(reference, reason)| (reference.clone(), Value::String(reason.clone())))
                    .collect(),
            )),
            _ => None,
        }
    }

    /// HTTP status used when a short request fails with this error
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Path(PathError::TerminalMismatch { .. }) => 409,
            EngineError::Path(_)
            | EngineError::MissingParameter(_)
            | EngineError::InvalidParameter { .. } => 400,
            EngineError::UnknownOperation(_) | EngineError::NotFound(_) => 404,
            EngineError::Git(err) if err.code() == git2::ErrorCode::NotFound => 404,
            EngineError::MergeConflict(_)
            | EngineError::FastForwardRequired
            | EngineError::PushRejected(_) => 409,
            EngineError::Unsupported(_) => 501,
            _ => 500,
        }
    }
}
