// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Duplex operation gateway
//!
//! A client opens `GET /git/<operation>` as a WebSocket, sends
//! `{"event": "<operation>:start", "payload": {...}}` and then receives
//! progress and interactive events until exactly one `<operation>:done`,
//! after which the server closes the socket. Interactive events carry a
//! `requestId`; see [`reply`] for how replies are matched.

pub mod emitter;
pub mod errors;
pub mod hooks;
pub mod reply;
pub mod session;

pub use emitter::{EventEmitter, Outbound};
pub use errors::GatewayError;
pub use hooks::GatewayHooks;
pub use reply::{Delivery, PendingReplies, ReplyWaiter};
pub use session::{Session, SessionState, connect, run_session};
