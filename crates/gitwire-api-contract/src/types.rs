// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Frames exchanged over the operation gateway

use crate::error::{ContractError, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Text sent when the first frame is not JSON at all.
pub const MALFORMED_START: &str =
    "Malformed start message. Expected JSON with 'event' and 'payload'.";

/// Lifecycle phase of an operation, the part after the colon in an event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "progress")]
    Progress,
    #[serde(rename = "message")]
    Message,
    #[serde(rename = "auth")]
    Auth,
    #[serde(rename = "authsuccess")]
    AuthSuccess,
    #[serde(rename = "authfailure")]
    AuthFailure,
    #[serde(rename = "onPostCheckout")]
    OnPostCheckout,
    #[serde(rename = "onSign")]
    OnSign,
    #[serde(rename = "mergeDriver")]
    MergeDriver,
    #[serde(rename = "done")]
    Done,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::Start => "start",
            Phase::Progress => "progress",
            Phase::Message => "message",
            Phase::Auth => "auth",
            Phase::AuthSuccess => "authsuccess",
            Phase::AuthFailure => "authfailure",
            Phase::OnPostCheckout => "onPostCheckout",
            Phase::OnSign => "onSign",
            Phase::MergeDriver => "mergeDriver",
            Phase::Done => "done",
        }
    }

    /// Phases whose event suspends the operation until the client replies.
    pub const fn is_interactive(self) -> bool {
        matches!(
            self,
            Phase::Auth | Phase::AuthFailure | Phase::OnSign | Phase::MergeDriver
        )
    }

    /// Full event name, `<operation>:<phase>`.
    pub fn event_name(self, operation: &str) -> String {
        format!("{}:{}", operation, self.as_str())
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound event `{event, data?, error?, sessionId?, args?, requestId?}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorEnvelope>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<u64>,
}

impl WireEvent {
    pub fn new(operation: &str, phase: Phase) -> Self {
        Self {
            event: phase.event_name(operation),
            data: None,
            error: None,
            session_id: None,
            args: None,
            request_id: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: ErrorEnvelope) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_args(mut self, args: Value) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Terminal success event
    pub fn done(operation: &str, result: Value, session_id: &str) -> Self {
        Self::new(operation, Phase::Done)
            .with_data(result)
            .with_session(session_id)
    }

    /// Terminal failure event
    pub fn failed(operation: &str, error: ErrorEnvelope, session_id: &str) -> Self {
        Self::new(operation, Phase::Done)
            .with_error(error)
            .with_session(session_id)
    }
}

/// One-off `{error}` frame answering an invalid start message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub error: String,
}

impl ProtocolError {
    pub fn invalid_event(operation: &str) -> Self {
        Self {
            error: format!(
                "Invalid event. Expected '{}'.",
                Phase::Start.event_name(operation)
            ),
        }
    }

    pub fn malformed() -> Self {
        Self {
            error: MALFORMED_START.to_string(),
        }
    }
}

/// Anything the gateway writes to the socket
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Event(WireEvent),
    Protocol(ProtocolError),
}

impl From<WireEvent> for OutboundFrame {
    fn from(event: WireEvent) -> Self {
        OutboundFrame::Event(event)
    }
}

impl From<ProtocolError> for OutboundFrame {
    fn from(error: ProtocolError) -> Self {
        OutboundFrame::Protocol(error)
    }
}

/// Inbound `{event, payload}` that starts an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartMessage {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl StartMessage {
    /// Decode a text frame; fails only when it is not JSON.
    ///
    /// A missing or non-string `event` decodes to `None`, which never starts
    /// an operation.
    pub fn parse(text: &str) -> Result<Self, ContractError> {
        let mut value: Value = serde_json::from_str(text)?;
        let event = value.get("event").and_then(Value::as_str).map(str::to_string);
        let payload = value.get_mut("payload").map(Value::take);
        Ok(Self { event, payload })
    }

    pub fn is_start_for(&self, operation: &str) -> bool {
        self.event.as_deref() == Some(Phase::Start.event_name(operation).as_str())
    }

    /// Payload handed to the engine; an absent or null payload becomes `{}`.
    pub fn into_payload(self) -> Value {
        match self.payload {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(payload) => payload,
        }
    }
}

/// Reply addressed to one interactive event: `{requestId, reply}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEnvelope {
    pub request_id: u64,
    pub reply: Value,
}

impl ReplyEnvelope {
    /// Recognise an envelope: an object with exactly `requestId` and `reply`.
    ///
    /// Any other value is a bare reply.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if object.len() != 2 {
            return None;
        }
        let request_id = object.get("requestId")?.as_u64()?;
        let reply = object.get("reply")?.clone();
        Some(Self { request_id, reply })
    }
}

/// Successful short-request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEnvelope<T> {
    pub data: T,
}

impl<T> DataEnvelope<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// JSON truthiness of a client reply; `null`, `false`, `0` and `""` are falsy.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}
