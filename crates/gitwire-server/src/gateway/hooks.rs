// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Engine hooks that talk to the client over the session's socket

use super::emitter::EventEmitter;
use super::reply::PendingReplies;
use async_trait::async_trait;
use gitwire_api_contract::{Phase, WireEvent, is_falsy};
use gitwire_engine::{
    GitAuth, HookError, MergeConflict, OperationHooks, PostCheckout, Progress, SignRequest,
};
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hook set bound to one running operation
///
/// Interactive hooks register their waiter before the event goes out, so a
/// reply can never arrive ahead of its waiter.
pub struct GatewayHooks {
    emitter: EventEmitter,
    replies: PendingReplies,
    reply_timeout: Option<Duration>,
    session_id: String,
    cancelled: AtomicBool,
}

impl GatewayHooks {
    pub fn new(
        emitter: EventEmitter,
        replies: PendingReplies,
        reply_timeout: Option<Duration>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            emitter,
            replies,
            reply_timeout,
            session_id: session_id.into(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Tell the engine to stop; the result of the operation is no longer wanted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn event(&self, phase: Phase) -> WireEvent {
        WireEvent::new(self.emitter.operation().as_str(), phase)
    }

    async fn ask(&self, phase: Phase, data: Value) -> Result<Value, HookError> {
        let waiter = self.replies.register();
        let request_id = waiter.id();
        self.emitter
            .emit(self.event(phase).with_data(data).with_request_id(request_id));

        let reply = waiter.wait(self.reply_timeout).await;
        match &reply {
            Ok(_) => debug!(session_id = %self.session_id, request_id, %phase, "Reply received"),
            Err(err) => {
                warn!(session_id = %self.session_id, request_id, %phase, error = %err, "Reply failed")
            }
        }
        reply
    }

    /// Credentials reply; anything falsy means "no credentials"
    async fn ask_credentials(&self, phase: Phase, url: &str, auth: &GitAuth) -> Result<Value, HookError> {
        let reply = self.ask(phase, json!({ "url": url, "auth": auth })).await?;
        Ok(if is_falsy(&reply) {
            Value::Object(Map::new())
        } else {
            reply
        })
    }
}

#[async_trait]
impl OperationHooks for GatewayHooks {
    fn on_progress(&self, progress: &Progress) {
        self.emitter.emit(self.event(Phase::Progress).with_data(json!(progress)));
    }

    fn on_message(&self, message: &str) {
        self.emitter
            .emit(self.event(Phase::Message).with_data(json!({ "message": message })));
    }

    async fn on_auth(&self, url: &str, auth: &GitAuth) -> Result<Value, HookError> {
        info!(session_id = %self.session_id, url, "Auth Required");
        self.ask_credentials(Phase::Auth, url, auth).await
    }

    fn on_auth_success(&self, url: &str, auth: &GitAuth) {
        info!(session_id = %self.session_id, url, "Auth Success");
        self.emitter
            .emit(self.event(Phase::AuthSuccess).with_data(json!({ "url": url, "auth": auth })));
    }

    async fn on_auth_failure(&self, url: &str, auth: &GitAuth) -> Result<Value, HookError> {
        warn!(session_id = %self.session_id, url, "Auth Failed");
        self.ask_credentials(Phase::AuthFailure, url, auth).await
    }

    fn on_post_checkout(&self, checkout: &PostCheckout) {
        debug!(session_id = %self.session_id, new_head = %checkout.new_head, "Post checkout");
        self.emitter
            .emit(self.event(Phase::OnPostCheckout).with_args(json!(checkout)));
    }

    async fn on_sign(&self, request: &SignRequest) -> Result<Value, HookError> {
        info!(session_id = %self.session_id, "Signing requested");
        self.ask(Phase::OnSign, json!(request)).await
    }

    async fn merge_driver(&self, conflict: &MergeConflict) -> Result<Value, HookError> {
        info!(session_id = %self.session_id, path = %conflict.path, "Merge conflict");
        self.ask(Phase::MergeDriver, json!(conflict)).await
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
