// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Conversions between libgit2 objects and payload JSON

use crate::error::EngineError;
use crate::params::Params;
use git2::{Commit, ErrorCode, Oid, Repository, Signature, Time};
use serde::Deserialize;
use serde_json::{Value, json};

/// `author` / `committer` / `tagger` payload objects
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Person {
    pub name: String,
    pub email: String,
    /// Seconds since the epoch
    pub timestamp: Option<i64>,
    /// Minutes west of UTC, the sign convention of `Date#getTimezoneOffset`
    pub timezone_offset: Option<i32>,
}

impl Person {
    pub fn signature(&self) -> Result<Signature<'static>, EngineError> {
        let signature = match self.timestamp {
            Some(seconds) => Signature::new(
                &self.name,
                &self.email,
                &Time::new(seconds, -self.timezone_offset.unwrap_or(0)),
            )?,
            None => Signature::now(&self.name, &self.email)?,
        };
        Ok(signature)
    }
}

/// Signature from the payload, falling back to `user.name` / `user.email`
pub(crate) fn signature(
    repo: &Repository,
    params: &Params<'_>,
    key: &'static str,
) -> Result<Signature<'static>, EngineError> {
    match params.object::<Person>(key)? {
        Some(person) => person.signature(),
        None => repo
            .signature()
            .map(|sig| sig.to_owned())
            .map_err(|_| EngineError::MissingParameter(key)),
    }
}

pub(crate) fn person_json(signature: &Signature<'_>) -> Value {
    json!({
        "name": signature.name().unwrap_or_default(),
        "email": signature.email().unwrap_or_default(),
        "timestamp": signature.when().seconds(),
        "timezoneOffset": -signature.when().offset_minutes(),
    })
}

pub(crate) fn commit_json(commit: &Commit<'_>) -> Value {
    json!({
        "oid": commit.id().to_string(),
        "commit": {
            "message": commit.message().unwrap_or_default(),
            "tree": commit.tree_id().to_string(),
            "parent": commit.parent_ids().map(|id| id.to_string()).collect::<Vec<_>>(),
            "author": person_json(&commit.author()),
            "committer": person_json(&commit.committer()),
        },
    })
}

/// `main` → `refs/heads/main`; full names pass through
pub(crate) fn full_branch_ref(name: &str) -> String {
    if name.starts_with("refs/") {
        name.to_string()
    } else {
        format!("refs/heads/{name}")
    }
}

/// `refs/heads/main` → `main`
pub(crate) fn short_branch(name: &str) -> &str {
    name.strip_prefix("refs/heads/").unwrap_or(name)
}

/// Checked-out branch name; `None` when HEAD is detached
pub(crate) fn current_branch(repo: &Repository) -> Result<Option<String>, EngineError> {
    let head = match repo.find_reference("HEAD") {
        Ok(head) => head,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    Ok(head
        .symbolic_target()
        .map(|target| short_branch(target).to_string()))
}

/// Commit HEAD points at, `None` on an unborn branch
pub(crate) fn head_oid(repo: &Repository) -> Option<Oid> {
    repo.head().ok().and_then(|head| head.target())
}

pub(crate) fn not_found(what: impl Into<String>) -> impl FnOnce(git2::Error) -> EngineError {
    let what = what.into();
    move |err| {
        if err.code() == ErrorCode::NotFound {
            EngineError::NotFound(what)
        } else {
            EngineError::Git(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_names() {
        assert_eq!(full_branch_ref("main"), "refs/heads/main");
        assert_eq!(full_branch_ref("refs/tags/v1"), "refs/tags/v1");
        assert_eq!(short_branch("refs/heads/feature/x"), "feature/x");
        assert_eq!(short_branch("main"), "main");
    }

    #[test]
    fn person_with_timestamp_keeps_offset_convention() {
        let person = Person {
            name: "A".into(),
            email: "a@example.com".into(),
            timestamp: Some(1_700_000_000),
            timezone_offset: Some(-120),
        };
        let signature = person.signature().unwrap();
        assert_eq!(signature.when().offset_minutes(), 120);
        assert_eq!(person_json(&signature)["timezoneOffset"], -120);
    }
}
