// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! One duplex session per WebSocket connection
//!
//! The reader loop owns the [`Session`]; the engine runs in its own task and
//! reports back only through the emitter and a completion signal.

use super::emitter::{EventEmitter, write_outbound};
use super::errors::GatewayError;
use super::hooks::GatewayHooks;
use super::reply::{Delivery, PendingReplies};
use crate::config::GatewayConfig;
use crate::error::RequestError;
use crate::state::AppState;
use axum::{
    extract::{
        OriginalUri, Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::Method,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use gitwire_api_contract::{ProtocolError, StartMessage, WireEvent};
use gitwire_engine::{Engine, HookError, OperationHooks, StreamOperation};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Finished,
}

/// Fires once the terminal event and the close are queued
pub type Completion = oneshot::Receiver<()>;

pub struct Session {
    operation: StreamOperation,
    state: SessionState,
    emitter: EventEmitter,
    replies: PendingReplies,
    engine: Arc<dyn Engine>,
    gateway: GatewayConfig,
}

impl Session {
    pub fn new(
        operation: StreamOperation,
        emitter: EventEmitter,
        engine: Arc<dyn Engine>,
        gateway: GatewayConfig,
    ) -> Self {
        Self {
            operation,
            state: SessionState::Idle,
            emitter,
            replies: PendingReplies::new(),
            engine,
            gateway,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one inbound text frame.
    ///
    /// Returns the completion signal when the frame started the operation.
    pub fn handle_text(&mut self, text: &str) -> Option<Completion> {
        match self.state {
            SessionState::Idle => self.handle_start(text),
            SessionState::Running => {
                self.handle_reply(text);
                None
            }
            SessionState::Finished => {
                debug!(operation = %self.operation, "Ignoring message after completion");
                None
            }
        }
    }

    /// Handle one inbound binary frame; its bytes must be UTF-8 JSON text.
    pub fn handle_binary(&mut self, bytes: Vec<u8>) -> Option<Completion> {
        match String::from_utf8(bytes) {
            Ok(text) => self.handle_text(&text),
            Err(err) => {
                match self.state {
                    SessionState::Idle => {
                        warn!(operation = %self.operation, error = %err, "Malformed start message");
                        self.emitter.emit(ProtocolError::malformed());
                    }
                    SessionState::Running => {
                        let delivery = self.replies.reject(HookError::Decode(err.to_string()));
                        self.log_delivery(delivery);
                    }
                    SessionState::Finished => {
                        debug!(operation = %self.operation, "Ignoring message after completion");
                    }
                }
                None
            }
        }
    }

    /// Every path that does not start the operation leaves the session idle.
    fn handle_start(&mut self, text: &str) -> Option<Completion> {
        let start = match StartMessage::parse(text) {
            Ok(start) => start,
            Err(err) => {
                warn!(operation = %self.operation, error = %err, "Malformed start message");
                self.emitter.emit(ProtocolError::malformed());
                return None;
            }
        };

        if !start.is_start_for(self.operation.as_str()) {
            warn!(operation = %self.operation, event = ?start.event, "Invalid event");
            self.emitter
                .emit(ProtocolError::invalid_event(self.operation.as_str()));
            return None;
        }

        Some(self.start(start.into_payload()))
    }

    fn handle_reply(&mut self, text: &str) {
        let operation = self.operation;
        if StartMessage::parse(text).is_ok_and(|start| start.is_start_for(operation.as_str())) {
            warn!(%operation, "Operation already in progress, dropping start message");
            return;
        }

        let delivery = self.replies.deliver_text(text);
        self.log_delivery(delivery);
    }

    fn log_delivery(&self, delivery: Delivery) {
        let operation = self.operation;
        match delivery {
            Delivery::Delivered(request_id) => debug!(%operation, request_id, "Reply delivered"),
            Delivery::Rejected(request_id) => {
                warn!(%operation, request_id, "Reply could not be decoded")
            }
            Delivery::UnknownRequest(request_id) => {
                warn!(%operation, request_id, "Discarding reply for unknown request")
            }
            Delivery::Unclaimed => debug!(%operation, "Discarding message, no reply pending"),
        }
    }

    fn start(&mut self, payload: Value) -> Completion {
        let session_id = Uuid::new_v4().to_string();
        self.state = SessionState::Running;

        let hooks = Arc::new(GatewayHooks::new(
            self.emitter.clone(),
            self.replies.clone(),
            self.gateway.reply_timeout(),
            session_id.clone(),
        ));
        let invocation = Invocation {
            operation: self.operation,
            payload,
            hooks,
            engine: Arc::clone(&self.engine),
            emitter: self.emitter.clone(),
            operation_timeout: self.gateway.operation_timeout(),
        };

        let (finished, completion) = oneshot::channel();
        let span = info_span!("operation", operation = %self.operation, session_id = %session_id);
        tokio::spawn(invocation.run(session_id, finished).instrument(span));
        completion
    }

    /// The operation settled, or the connection is going away.
    pub fn finish(&mut self) {
        self.state = SessionState::Finished;
        self.replies.close();
    }
}

/// Queues the close and signals completion however the invocation ends
struct CloseGuard {
    emitter: EventEmitter,
    finished: Option<oneshot::Sender<()>>,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.emitter.close();
        if let Some(finished) = self.finished.take() {
            let _ = finished.send(());
        }
    }
}

struct Invocation {
    operation: StreamOperation,
    payload: Value,
    hooks: Arc<GatewayHooks>,
    engine: Arc<dyn Engine>,
    emitter: EventEmitter,
    operation_timeout: Option<Duration>,
}

impl Invocation {
    async fn run(self, session_id: String, finished: oneshot::Sender<()>) {
        let _guard = CloseGuard {
            emitter: self.emitter.clone(),
            finished: Some(finished),
        };
        let operation = self.operation;
        info!("Starting operation");

        let result = self.invoke().await;
        match result {
            Ok(data) => {
                info!("Operation completed successfully");
                self.emitter
                    .emit(WireEvent::done(operation.as_str(), data, &session_id));
            }
            Err(err) => {
                error!(code = %err.code(), error = %err, "Operation failed");
                self.emitter.emit(WireEvent::failed(
                    operation.as_str(),
                    err.to_envelope(),
                    &session_id,
                ));
            }
        }
        debug!("Closing connection");
    }

    /// Run the engine in its own task so a panic becomes an error
    async fn invoke(&self) -> Result<Value, GatewayError> {
        let engine = Arc::clone(&self.engine);
        let hooks: Arc<dyn OperationHooks> = self.hooks.clone();
        let operation = self.operation;
        let payload = self.payload.clone();
        let mut call = tokio::spawn(async move { engine.run(operation, payload, hooks).await });

        let joined = match self.operation_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut call).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(timeout_secs = limit.as_secs(), "Operation timed out, cancelling engine work");
                    self.hooks.cancel();
                    call.abort();
                    return Err(GatewayError::OperationTimeout(limit));
                }
            },
            None => call.await,
        };

        match joined {
            Ok(result) => result.map_err(GatewayError::from),
            Err(err) => Err(GatewayError::EngineAborted(err.to_string())),
        }
    }
}

async fn completed(completion: &mut Option<Completion>) {
    match completion {
        Some(rx) => {
            let _ = rx.await;
        }
        None => std::future::pending().await,
    }
}

/// Drive one connection until the operation settles or the client leaves
pub async fn run_session(
    socket: WebSocket,
    operation: StreamOperation,
    engine: Arc<dyn Engine>,
    gateway: GatewayConfig,
) {
    let (sink, mut stream) = socket.split();
    let (emitter, outbound) = EventEmitter::channel(operation);
    tokio::spawn(write_outbound(sink, outbound));

    let mut session = Session::new(operation, emitter, engine, gateway);
    let mut completion: Option<Completion> = None;

    loop {
        tokio::select! {
            _ = completed(&mut completion) => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    debug!(%operation, "WS Received");
                    if let Some(started) = session.handle_text(&text) {
                        completion = Some(started);
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    debug!(%operation, "WS Received binary");
                    if let Some(started) = session.handle_binary(bytes) {
                        completion = Some(started);
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(%operation, "Client closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(%operation, error = %err, "WebSocket receive failed");
                    break;
                }
            },
        }
    }

    session.finish();
}

/// `GET /git/<operation>`: upgrade to a duplex session
pub async fn connect(
    State(state): State<AppState>,
    Path(name): Path<String>,
    OriginalUri(uri): OriginalUri,
    ws: WebSocketUpgrade,
) -> Response {
    let operation = match name.parse::<StreamOperation>() {
        Ok(operation) => operation,
        Err(err) => {
            return RequestError {
                path: uri.to_string(),
                method: Method::GET,
                caller: None,
                error: err.into(),
            }
            .into_response();
        }
    };

    let engine = Arc::clone(&state.engine);
    let gateway = state.config.gateway.clone();
    debug!(%operation, "Upgrading connection");
    ws.on_upgrade(move |socket| run_session(socket, operation, engine, gateway))
}
