// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Execution engine for gitwire
//!
//! The server talks to repositories only through the [`Engine`] trait:
//! long-running [`StreamOperation`]s receive an [`OperationHooks`] set they
//! call back into while they run, short [`Command`]s just take a payload.
//! [`GitEngine`] is the libgit2-backed implementation.

pub mod engine;
pub mod error;
pub mod git;
pub mod hooks;
pub mod operation;
pub mod params;
pub mod paths;

pub use engine::Engine;
pub use error::{EngineError, HookError};
pub use git::{GitEngine, GitEngineConfig};
pub use hooks::{
    BlockingHooks, CheckoutKind, GitAuth, MergeConflict, MergeResolution, NoopHooks, OperationHooks,
    PostCheckout, Progress, SignRequest, SignResult,
};
pub use operation::{Command, StreamOperation};
pub use paths::{Environment, HostProbe, PathError, PathResolver, SystemProbe};
