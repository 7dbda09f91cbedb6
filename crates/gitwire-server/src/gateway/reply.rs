// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Correlation of client replies with the interactive events awaiting them
//!
//! Each interactive event gets a request id (1, 2, ... per session). A reply
//! is either `{"requestId": n, "reply": value}`, routed to waiter `n`, or any
//! other JSON value, handed to the oldest waiter.

use gitwire_api_contract::ReplyEnvelope;
use gitwire_engine::HookError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;

type ReplySender = oneshot::Sender<Result<Value, HookError>>;

#[derive(Default)]
struct Waiters {
    last_id: u64,
    open: BTreeMap<u64, ReplySender>,
    closed: bool,
}

/// What happened to an inbound frame offered as a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Resolved the waiter with this id
    Delivered(u64),
    /// The frame could not be decoded; the oldest waiter failed with a decode error
    Rejected(u64),
    /// An envelope named an id nobody waits for
    UnknownRequest(u64),
    /// No waiter was outstanding
    Unclaimed,
}

/// Waiters of one session, shared between the reader and the hooks
#[derive(Clone, Default)]
pub struct PendingReplies {
    inner: Arc<Mutex<Waiters>>,
}

impl PendingReplies {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        // A panic while holding the lock leaves the map consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate the next request id and start listening for its reply.
    ///
    /// After [`close`](Self::close) the waiter fails straight away.
    pub fn register(&self) -> ReplyWaiter {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.lock();
        waiters.last_id += 1;
        let id = waiters.last_id;
        if !waiters.closed {
            waiters.open.insert(id, tx);
        }
        ReplyWaiter {
            id,
            rx,
            pending: self.clone(),
        }
    }

    /// Offer a raw text frame
    pub fn deliver_text(&self, text: &str) -> Delivery {
        match serde_json::from_str::<Value>(text) {
            Ok(value) => self.deliver(value),
            Err(err) => self.reject(HookError::Decode(err.to_string())),
        }
    }

    /// Fail the oldest waiter with `error`
    pub fn reject(&self, error: HookError) -> Delivery {
        let mut waiters = self.lock();
        match waiters.open.pop_first() {
            Some((id, tx)) => {
                let _ = tx.send(Err(error));
                Delivery::Rejected(id)
            }
            None => Delivery::Unclaimed,
        }
    }

    /// Offer a decoded frame
    pub fn deliver(&self, value: Value) -> Delivery {
        let mut waiters = self.lock();
        if let Some(envelope) = ReplyEnvelope::from_value(&value) {
            return match waiters.open.remove(&envelope.request_id) {
                Some(tx) => {
                    let _ = tx.send(Ok(envelope.reply));
                    Delivery::Delivered(envelope.request_id)
                }
                None => Delivery::UnknownRequest(envelope.request_id),
            };
        }
        match waiters.open.pop_first() {
            Some((id, tx)) => {
                let _ = tx.send(Ok(value));
                Delivery::Delivered(id)
            }
            None => Delivery::Unclaimed,
        }
    }

    pub fn outstanding(&self) -> usize {
        self.lock().open.len()
    }

    /// The connection is gone: fail every waiter, present and future.
    pub fn close(&self) {
        let mut waiters = self.lock();
        waiters.closed = true;
        waiters.open.clear();
    }

    fn forget(&self, id: u64) {
        self.lock().open.remove(&id);
    }
}

/// One outstanding reply; deregisters itself when dropped
pub struct ReplyWaiter {
    id: u64,
    rx: oneshot::Receiver<Result<Value, HookError>>,
    pending: PendingReplies,
}

impl ReplyWaiter {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the reply, at most `timeout` when one is set
    pub async fn wait(mut self, timeout: Option<Duration>) -> Result<Value, HookError> {
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => return Err(HookError::ReplyTimeout(limit)),
            },
            None => (&mut self.rx).await,
        };
        received.unwrap_or(Err(HookError::ChannelClosed))
    }
}

impl Drop for ReplyWaiter {
    fn drop(&mut self) {
        self.pending.forget(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn bare_reply_goes_to_the_oldest_waiter() {
        let pending = PendingReplies::new();
        let first = pending.register();
        let second = pending.register();
        assert_eq!((first.id(), second.id()), (1, 2));

        assert_eq!(pending.deliver(json!({ "username": "a" })), Delivery::Delivered(1));
        assert_eq!(first.wait(None).await.unwrap(), json!({ "username": "a" }));
        assert_eq!(pending.outstanding(), 1);
        drop(second);
        assert_eq!(pending.outstanding(), 0);
    }

    #[tokio::test]
    async fn envelope_routes_by_request_id() {
        let pending = PendingReplies::new();
        let first = pending.register();
        let second = pending.register();

        let delivery = pending.deliver(json!({ "requestId": 2, "reply": { "signature": "sig" } }));
        assert_eq!(delivery, Delivery::Delivered(2));
        assert_eq!(second.wait(None).await.unwrap(), json!({ "signature": "sig" }));

        assert_eq!(
            pending.deliver(json!({ "requestId": 9, "reply": null })),
            Delivery::UnknownRequest(9)
        );
        assert_eq!(pending.outstanding(), 1);
        drop(first);
    }

    #[tokio::test]
    async fn invalid_json_rejects_the_waiter() {
        let pending = PendingReplies::new();
        let waiter = pending.register();

        assert_eq!(pending.deliver_text("{not json"), Delivery::Rejected(1));
        assert!(matches!(waiter.wait(None).await, Err(HookError::Decode(_))));
        assert_eq!(pending.deliver_text("{still not json"), Delivery::Unclaimed);
    }

    #[test]
    fn frames_without_waiters_are_unclaimed() {
        let pending = PendingReplies::new();
        assert_eq!(pending.deliver(json!("stray")), Delivery::Unclaimed);
    }

    #[tokio::test]
    async fn waiter_times_out_and_deregisters() {
        let pending = PendingReplies::new();
        let waiter = pending.register();
        let limit = Duration::from_millis(20);

        let err = waiter.wait(Some(limit)).await.unwrap_err();
        assert!(matches!(err, HookError::ReplyTimeout(elapsed) if elapsed == limit));
        assert_eq!(pending.outstanding(), 0);
    }

    #[tokio::test]
    async fn close_fails_pending_and_later_waiters() {
        let pending = PendingReplies::new();
        let waiter = pending.register();
        pending.close();

        assert!(matches!(waiter.wait(None).await, Err(HookError::ChannelClosed)));
        let late = pending.register();
        assert!(matches!(late.wait(None).await, Err(HookError::ChannelClosed)));
    }
}
