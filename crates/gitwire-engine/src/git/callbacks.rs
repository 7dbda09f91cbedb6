// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! libgit2 remote callbacks routed to operation hooks
//!
//! libgit2 only lets a callback fail with a `git2::Error`, so the real cause
//! (a hook error, a cancel, too many attempts) is parked here and swapped
//! back in by [`Transfer::error`] once the libgit2 call returns.
//!
//! Network callbacks are also the checkpoints where an abandoned operation
//! stops: libgit2 aborts the transfer when a progress callback returns `false`.

use crate::error::EngineError;
use crate::hooks::{BlockingHooks, GitAuth, Progress};
use git2::{Cred, CredentialType, RemoteCallbacks};
use std::cell::{Cell, RefCell};
use tracing::{info, warn};

/// Credential prompts allowed per operation before giving up
pub(crate) const MAX_AUTH_ATTEMPTS: u32 = 3;

#[derive(Default)]
struct AuthState {
    attempts: u32,
    url: Option<String>,
    last: Option<GitAuth>,
}

/// Callback state for one network operation
pub(crate) struct Transfer<'h> {
    hooks: &'h BlockingHooks,
    auth: RefCell<AuthState>,
    failure: RefCell<Option<EngineError>>,
    rejections: RefCell<Vec<(String, String)>>,
    last_step: Cell<Option<(&'static str, usize)>>,
}

impl<'h> Transfer<'h> {
    pub fn new(hooks: &'h BlockingHooks) -> Self {
        Self {
            hooks,
            auth: RefCell::new(AuthState::default()),
            failure: RefCell::new(None),
            rejections: RefCell::new(Vec::new()),
            last_step: Cell::new(None),
        }
    }

    pub fn callbacks(&self) -> RemoteCallbacks<'_> {
        let mut callbacks = RemoteCallbacks::new();
        callbacks.credentials(move |url, username_from_url, allowed| {
            self.credentials(url, username_from_url, allowed)
        });
        callbacks.transfer_progress(move |stats| {
            if stats.total_deltas() > 0 && stats.received_objects() == stats.total_objects() {
                self.step("Resolving deltas", stats.indexed_deltas(), stats.total_deltas());
            } else {
                self.step("Receiving objects", stats.received_objects(), stats.total_objects());
            }
            self.keep_going()
        });
        callbacks.sideband_progress(move |data| {
            let text = String::from_utf8_lossy(data);
            let line = text.trim();
            if !line.is_empty() {
                self.hooks.message(line);
            }
            self.keep_going()
        });
        callbacks.push_transfer_progress(move |current, total, _bytes| {
            self.step("Writing objects", current, total);
        });
        callbacks.push_update_reference(move |reference, status| {
            if let Some(reason) = status {
                warn!(reference, reason, "Remote rejected reference update");
                self.rejections
                    .borrow_mut()
                    .push((reference.to_string(), reason.to_string()));
            }
            Ok(())
        });
        callbacks
    }

    /// `false` once the operation was abandoned; the cancel becomes the
    /// reported failure.
    pub fn keep_going(&self) -> bool {
        if !self.hooks.is_cancelled() {
            return true;
        }
        let mut failure = self.failure.borrow_mut();
        if failure.is_none() {
            warn!("Operation abandoned, stopping transfer");
            *failure = Some(EngineError::UserCanceled);
        }
        false
    }

    /// Progress event, skipping repeats of the same step
    pub fn step(&self, phase: &'static str, loaded: usize, total: usize) {
        if self.last_step.get() == Some((phase, loaded)) {
            return;
        }
        self.last_step.set(Some((phase, loaded)));
        self.hooks
            .progress(&Progress::new(phase, loaded as u64, Some(total as u64)));
    }

    fn credentials(
        &self,
        url: &str,
        username_from_url: Option<&str>,
        allowed: CredentialType,
    ) -> Result<Cred, git2::Error> {
        if !self.keep_going() {
            return Err(git2::Error::from_str("operation abandoned"));
        }

        // SSH asks for the user name alone before it asks for a key
        if allowed == CredentialType::USERNAME {
            if let Some(username) = username_from_url {
                return Cred::username(username);
            }
        }

        match self.ask(url, username_from_url) {
            Ok(auth) => build_credential(&auth, username_from_url, allowed),
            Err(err) => {
                let message = err.to_string();
                *self.failure.borrow_mut() = Some(err);
                Err(git2::Error::from_str(&message))
            }
        }
    }

    fn ask(&self, url: &str, username_from_url: Option<&str>) -> Result<GitAuth, EngineError> {
        let (attempt, previous) = {
            let mut state = self.auth.borrow_mut();
            state.attempts += 1;
            (state.attempts, state.last.clone())
        };

        if attempt > MAX_AUTH_ATTEMPTS {
            return Err(EngineError::AuthFailed {
                url: url.to_string(),
                attempts: MAX_AUTH_ATTEMPTS,
            });
        }

        let auth = match previous {
            None => {
                info!(url, "Auth Required");
                let offered = GitAuth {
                    username: username_from_url.map(str::to_string),
                    ..GitAuth::default()
                };
                self.hooks.auth(url, &offered)?
            }
            Some(previous) => {
                warn!(url, attempt, "Auth Failed");
                self.hooks.auth_failure(url, &previous)?
            }
        };

        if auth.cancel {
            return Err(EngineError::UserCanceled);
        }

        let mut state = self.auth.borrow_mut();
        state.url = Some(url.to_string());
        state.last = Some(auth.clone());
        Ok(auth)
    }

    /// Report `authsuccess` when the operation used client credentials
    pub fn finish(&self) {
        let state = self.auth.borrow();
        if let (Some(url), Some(auth)) = (&state.url, &state.last) {
            info!(url = %url, "Auth Success");
            self.hooks.auth_success(url, auth);
        }
    }

    /// The error to report for a failed libgit2 call
    pub fn error(&self, err: git2::Error) -> EngineError {
        self.failure
            .borrow_mut()
            .take()
            .unwrap_or(EngineError::Git(err))
    }

    pub fn take_rejections(&self) -> Vec<(String, String)> {
        std::mem::take(&mut *self.rejections.borrow_mut())
    }
}

fn build_credential(
    auth: &GitAuth,
    username_from_url: Option<&str>,
    allowed: CredentialType,
) -> Result<Cred, git2::Error> {
    let username = auth
        .username
        .as_deref()
        .or(username_from_url)
        .unwrap_or("git");

    if allowed.is_user_pass_plaintext() {
        return Cred::userpass_plaintext(username, auth.password.as_deref().unwrap_or(""));
    }
    if allowed.is_ssh_key() {
        return Cred::ssh_key_from_agent(username);
    }
    if allowed.is_username() {
        return Cred::username(username);
    }
    Cred::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use crate::hooks::{MergeConflict, OperationHooks, PostCheckout, SignRequest};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Abandonable {
        cancelled: AtomicBool,
        asked: AtomicBool,
    }

    #[async_trait]
    impl OperationHooks for Abandonable {
        fn on_progress(&self, _progress: &Progress) {}

        fn on_message(&self, _message: &str) {}

        async fn on_auth(&self, _url: &str, _auth: &GitAuth) -> Result<Value, HookError> {
            self.asked.store(true, Ordering::SeqCst);
            Ok(json!({ "username": "u", "password": "p" }))
        }

        fn on_auth_success(&self, _url: &str, _auth: &GitAuth) {}

        async fn on_auth_failure(&self, _url: &str, _auth: &GitAuth) -> Result<Value, HookError> {
            Ok(json!({}))
        }

        fn on_post_checkout(&self, _checkout: &PostCheckout) {}

        async fn on_sign(&self, _request: &SignRequest) -> Result<Value, HookError> {
            Ok(json!({}))
        }

        async fn merge_driver(&self, _conflict: &MergeConflict) -> Result<Value, HookError> {
            Ok(json!({}))
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }
    }

    fn blocking(hooks: Arc<Abandonable>) -> (tokio::runtime::Runtime, BlockingHooks) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let blocking = BlockingHooks::new(runtime.handle().clone(), hooks);
        (runtime, blocking)
    }

    #[test]
    fn abandoned_transfer_stops_and_reports_cancel() {
        let hooks = Arc::new(Abandonable::default());
        let (_runtime, blocking) = blocking(hooks.clone());
        let transfer = Transfer::new(&blocking);

        assert!(transfer.keep_going());
        hooks.cancelled.store(true, Ordering::SeqCst);
        assert!(!transfer.keep_going());
        assert!(!transfer.keep_going());

        let err = transfer.error(git2::Error::from_str("callback returned an error"));
        assert!(matches!(err, EngineError::UserCanceled));
    }

    #[test]
    fn abandoned_transfer_asks_for_no_credentials() {
        let hooks = Arc::new(Abandonable::default());
        hooks.cancelled.store(true, Ordering::SeqCst);
        let (_runtime, blocking) = blocking(hooks.clone());
        let transfer = Transfer::new(&blocking);

        assert!(transfer
            .credentials("https://example/repo.git", None, CredentialType::USER_PASS_PLAINTEXT)
            .is_err());
        assert!(!hooks.asked.load(Ordering::SeqCst));
        assert!(matches!(
            transfer.error(git2::Error::from_str("auth")),
            EngineError::UserCanceled
        ));
    }
}
