// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! libgit2-backed engine
//!
//! libgit2 is synchronous, so every call runs on the blocking pool. Hooks
//! are reached through [`BlockingHooks`], which parks the blocking thread
//! while an interactive hook waits for the client.

mod callbacks;
mod checkout;
mod commands;
mod merge;
mod remote;
mod values;

use crate::engine::Engine;
use crate::error::EngineError;
use crate::hooks::{BlockingHooks, OperationHooks};
use crate::operation::{Command, StreamOperation};
use crate::params::Params;
use crate::paths::PathResolver;
use async_trait::async_trait;
use git2::{FetchOptions, ProxyOptions, PushOptions};
use gitwire_logging::redact_json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::debug;

pub(crate) use callbacks::Transfer;

/// Remote name used when a payload does not pick one
pub(crate) const DEFAULT_REMOTE: &str = "origin";

/// Settings applied to every network operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitEngineConfig {
    /// Proxy for fetch, push and remote listing; libgit2 falls back to the
    /// `http.proxy` git config when unset.
    pub proxy_url: Option<String>,
}

/// Shared by all operations of one engine
pub(crate) struct EngineContext {
    pub config: GitEngineConfig,
    pub resolver: PathResolver,
}

impl EngineContext {
    pub fn proxy_options(&self) -> ProxyOptions<'static> {
        let mut proxy = ProxyOptions::new();
        match &self.config.proxy_url {
            Some(url) => {
                proxy.url(url);
            }
            None => {
                proxy.auto();
            }
        }
        proxy
    }

    pub fn fetch_options<'a>(&self, transfer: &'a Transfer<'_>, headers: &[String]) -> FetchOptions<'a> {
        let mut options = FetchOptions::new();
        options.remote_callbacks(transfer.callbacks());
        options.proxy_options(self.proxy_options());
        if !headers.is_empty() {
            let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
            options.custom_headers(&headers);
        }
        options
    }

    pub fn push_options<'a>(&self, transfer: &'a Transfer<'_>, headers: &[String]) -> PushOptions<'a> {
        let mut options = PushOptions::new();
        options.remote_callbacks(transfer.callbacks());
        options.proxy_options(self.proxy_options());
        if !headers.is_empty() {
            let headers: Vec<&str> = headers.iter().map(String::as_str).collect();
            options.custom_headers(&headers);
        }
        options
    }
}

/// `headers` payload field as `Name: value` lines
pub(crate) fn header_lines(params: &Params<'_>) -> Result<Vec<String>, EngineError> {
    Ok(params
        .headers()?
        .into_iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect())
}

/// [`Engine`] implementation over libgit2
#[derive(Clone)]
pub struct GitEngine {
    context: Arc<EngineContext>,
}

impl GitEngine {
    pub fn new(config: GitEngineConfig, resolver: PathResolver) -> Self {
        Self {
            context: Arc::new(EngineContext { config, resolver }),
        }
    }

    pub fn resolver(&self) -> PathResolver {
        self.context.resolver
    }
}

#[async_trait]
impl Engine for GitEngine {
    async fn run(
        &self,
        operation: StreamOperation,
        payload: Value,
        hooks: Arc<dyn OperationHooks>,
    ) -> Result<Value, EngineError> {
        debug!(operation = %operation, payload = %redact_json(&payload), "Executing git operation");
        let context = Arc::clone(&self.context);
        let hooks = BlockingHooks::new(Handle::current(), hooks);

        tokio::task::spawn_blocking(move || {
            let params = Params::new(&payload)?;
            match operation {
                StreamOperation::Clone => remote::clone(&context, &hooks, params),
                StreamOperation::Fetch => remote::fetch(&context, &hooks, params),
                StreamOperation::Push => remote::push(&context, &hooks, params),
                StreamOperation::Pull => remote::pull(&context, &hooks, params),
                StreamOperation::Checkout => checkout::checkout(&context, &hooks, params),
                StreamOperation::GetRemoteInfo => remote::get_remote_info(&context, &hooks, params),
                StreamOperation::ListServerRefs => remote::list_server_refs(&context, &hooks, params),
            }
        })
        .await
        .map_err(|err| EngineError::Join(err.to_string()))?
    }

    async fn execute(&self, command: Command, payload: Value) -> Result<Value, EngineError> {
        debug!(command = %command, payload = %redact_json(&payload), "Executing git command");
        if command == Command::Version {
            return Ok(Value::String(self.version()));
        }

        let context = Arc::clone(&self.context);
        tokio::task::spawn_blocking(move || {
            let params = Params::new(&payload)?;
            commands::execute(&context, command, params)
        })
        .await
        .map_err(|err| EngineError::Join(err.to_string()))?
    }

    fn is_repository(&self, dir: &str) -> bool {
        self.context
            .resolver
            .resolve(dir)
            .map(|path| path.join(".git").is_dir())
            .unwrap_or(false)
    }

    fn version(&self) -> String {
        let (major, minor, patch) = git2::Version::get().libgit2_version();
        format!("{major}.{minor}.{patch}")
    }
}
