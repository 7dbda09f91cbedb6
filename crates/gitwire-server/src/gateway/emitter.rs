// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Outbound side of a duplex session
//!
//! Every frame goes through one unbounded channel drained by a single writer
//! task, so frames reach the socket in the order they were emitted.

use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use gitwire_api_contract::OutboundFrame;
use gitwire_engine::StreamOperation;
use gitwire_logging::redact_json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Item queued for the writer task
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// Fire-and-forget sender bound to one connection
#[derive(Debug, Clone)]
pub struct EventEmitter {
    operation: StreamOperation,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl EventEmitter {
    pub fn channel(operation: StreamOperation) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { operation, tx }, rx)
    }

    pub fn operation(&self) -> StreamOperation {
        self.operation
    }

    /// Serialize and queue a frame. Never blocks; a closed connection only
    /// gets a debug line.
    pub fn emit(&self, frame: impl Into<OutboundFrame>) {
        let frame = frame.into();
        let value = match serde_json::to_value(&frame) {
            Ok(value) => value,
            Err(err) => {
                warn!(operation = %self.operation, error = %err, "Failed to serialize outbound frame");
                return;
            }
        };
        debug!(operation = %self.operation, frame = %redact_json(&value), "WS Sending");

        if self.tx.send(Outbound::Text(value.to_string())).is_err() {
            debug!(operation = %self.operation, "Connection gone, dropping outbound frame");
        }
    }

    /// Queue a close after everything emitted so far
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

/// Drain `rx` into the socket until a close is queued or the socket fails
pub async fn write_outbound<S>(mut sink: S, mut rx: mpsc::UnboundedReceiver<Outbound>)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(item) = rx.recv().await {
        let message = match item {
            Outbound::Text(text) => Message::Text(text),
            Outbound::Close => {
                if let Err(err) = sink.send(Message::Close(None)).await {
                    debug!(error = %err, "Failed to send close frame");
                }
                break;
            }
        };
        if let Err(err) = sink.send(message).await {
            debug!(error = %err, "WebSocket send failed, stopping writer");
            break;
        }
    }
    let _ = sink.close().await;
}
