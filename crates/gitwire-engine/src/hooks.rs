// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Callbacks an operation makes back into whoever started it
//!
//! Informational hooks return immediately. Interactive hooks (`on_auth`,
//! `on_auth_failure`, `on_sign`, `merge_driver`) suspend the operation until
//! the client decides and hand back the client's reply as JSON; the engine
//! decodes that reply with the `from_reply` helpers below.

use crate::error::{EngineError, HookError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Handle;

/// Transfer progress `{phase, loaded, total}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub phase: String,
    pub loaded: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub total: Option<u64>,
}

impl Progress {
    pub fn new(phase: impl Into<String>, loaded: u64, total: Option<u64>) -> Self {
        Self {
            phase: phase.into(),
            loaded,
            total,
        }
    }
}

/// Credentials offered to, or supplied by, the client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitAuth {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "std::ops::Not::not", default)]
    pub cancel: bool,
}

impl GitAuth {
    pub fn from_reply(reply: Value) -> Result<Self, EngineError> {
        decode_reply("auth", reply)
    }
}

/// Notice sent after the working tree moved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCheckout {
    pub previous_head: String,
    pub new_head: String,
    #[serde(rename = "type")]
    pub kind: CheckoutKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutKind {
    Branch,
    File,
}

/// Commit payload the client must sign
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignRequest {
    pub payload: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignResult {
    pub signature: String,
}

impl SignResult {
    pub fn from_reply(reply: Value) -> Result<Self, EngineError> {
        decode_reply("onSign", reply)
    }
}

/// One conflicted file: base, ours and theirs, in that order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub path: String,
    pub branches: [String; 3],
    pub contents: [String; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResolution {
    pub clean_merge: bool,
    #[serde(default)]
    pub merged_text: String,
}

impl MergeResolution {
    pub fn from_reply(reply: Value) -> Result<Self, EngineError> {
        decode_reply("mergeDriver", reply)
    }
}

fn decode_reply<T: DeserializeOwned>(hook: &'static str, reply: Value) -> Result<T, EngineError> {
    serde_json::from_value(reply).map_err(|err| EngineError::InvalidReply {
        hook,
        reason: err.to_string(),
    })
}

/// Hook set bound to one running operation
#[async_trait]
pub trait OperationHooks: Send + Sync {
    fn on_progress(&self, progress: &Progress);

    fn on_message(&self, message: &str);

    /// Credentials are needed; returns the client's reply
    async fn on_auth(&self, url: &str, auth: &GitAuth) -> Result<Value, HookError>;

    fn on_auth_success(&self, url: &str, auth: &GitAuth);

    /// The last credentials were rejected; returns the client's next attempt
    async fn on_auth_failure(&self, url: &str, auth: &GitAuth) -> Result<Value, HookError>;

    fn on_post_checkout(&self, checkout: &PostCheckout);

    async fn on_sign(&self, request: &SignRequest) -> Result<Value, HookError>;

    async fn merge_driver(&self, conflict: &MergeConflict) -> Result<Value, HookError>;

    /// The caller gave up on the operation; blocking work should stop at its
    /// next checkpoint.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Hooks for callers with nobody to ask; interactive hooks answer `{}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl OperationHooks for NoopHooks {
    fn on_progress(&self, _progress: &Progress) {}

    fn on_message(&self, _message: &str) {}

    async fn on_auth(&self, _url: &str, _auth: &GitAuth) -> Result<Value, HookError> {
        Ok(Value::Object(Default::default()))
    }

    fn on_auth_success(&self, _url: &str, _auth: &GitAuth) {}

    async fn on_auth_failure(&self, _url: &str, _auth: &GitAuth) -> Result<Value, HookError> {
        Ok(Value::Object(Default::default()))
    }

    fn on_post_checkout(&self, _checkout: &PostCheckout) {}

    async fn on_sign(&self, _request: &SignRequest) -> Result<Value, HookError> {
        Ok(Value::Null)
    }

    async fn merge_driver(&self, _conflict: &MergeConflict) -> Result<Value, HookError> {
        Ok(Value::Null)
    }
}

/// Synchronous view of a hook set for code running on a blocking thread
///
/// Must not be used from inside an async task: `block_on` panics there.
#[derive(Clone)]
pub struct BlockingHooks {
    handle: Handle,
    hooks: Arc<dyn OperationHooks>,
}

impl BlockingHooks {
    pub fn new(handle: Handle, hooks: Arc<dyn OperationHooks>) -> Self {
        Self { handle, hooks }
    }

    pub fn progress(&self, progress: &Progress) {
        self.hooks.on_progress(progress);
    }

    pub fn is_cancelled(&self) -> bool {
        self.hooks.is_cancelled()
    }

    pub fn message(&self, message: &str) {
        self.hooks.on_message(message);
    }

    pub fn auth(&self, url: &str, auth: &GitAuth) -> Result<GitAuth, EngineError> {
        let reply = self.handle.block_on(self.hooks.on_auth(url, auth))?;
        GitAuth::from_reply(reply)
    }

    pub fn auth_success(&self, url: &str, auth: &GitAuth) {
        self.hooks.on_auth_success(url, auth);
    }

    pub fn auth_failure(&self, url: &str, auth: &GitAuth) -> Result<GitAuth, EngineError> {
        let reply = self.handle.block_on(self.hooks.on_auth_failure(url, auth))?;
        GitAuth::from_reply(reply)
    }

    pub fn post_checkout(&self, checkout: &PostCheckout) {
        self.hooks.on_post_checkout(checkout);
    }

    pub fn sign(&self, request: &SignRequest) -> Result<SignResult, EngineError> {
        let reply = self.handle.block_on(self.hooks.on_sign(request))?;
        SignResult::from_reply(reply)
    }

    pub fn merge(&self, conflict: &MergeConflict) -> Result<MergeResolution, EngineError> {
        let reply = self.handle.block_on(self.hooks.merge_driver(conflict))?;
        MergeResolution::from_reply(reply)
    }
}
