// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use crate::error::EngineError;
use crate::hooks::OperationHooks;
use crate::operation::{Command, StreamOperation};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Pluggable execution engine behind both the gateway and short requests
///
/// Implementations never see the transport: a streaming operation gets its
/// hooks as a separate argument and reports everything else through the
/// returned value or error.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Run a long operation, calling back into `hooks` while it progresses
    async fn run(
        &self,
        operation: StreamOperation,
        payload: Value,
        hooks: Arc<dyn OperationHooks>,
    ) -> Result<Value, EngineError>;

    /// Execute a short command
    async fn execute(&self, command: Command, payload: Value) -> Result<Value, EngineError>;

    /// Whether `dir` resolves to a directory holding a repository.
    /// Path errors count as "no".
    fn is_repository(&self, dir: &str) -> bool;

    fn version(&self) -> String;
}
