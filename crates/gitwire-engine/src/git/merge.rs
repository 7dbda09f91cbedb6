// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Merging a fetched commit into a local branch
//!
//! Conflicted files go to the client's merge driver one by one; a merge
//! commit is signed through the client when a signing key is given.

use super::checkout::switch_to;
use super::values::head_oid;
use crate::error::EngineError;
use crate::hooks::{BlockingHooks, MergeConflict, SignRequest};
use git2::{Commit, ErrorCode, Index, IndexConflict, IndexEntry, Oid, Repository, Signature};
use serde_json::{Value, json};
use std::path::Path;
use tracing::{debug, info};

/// Stage bits of `IndexEntry::flags`
const INDEX_STAGE_MASK: u16 = 0x3000;

pub(crate) struct MergeRequest<'a> {
    /// Local branch receiving the merge, short name
    pub branch: &'a str,
    pub theirs: Oid,
    /// How the incoming side is named in messages and conflict labels
    pub their_label: &'a str,
    pub fast_forward_only: bool,
    pub message: Option<&'a str>,
    pub signing_key: Option<&'a str>,
}

pub(crate) enum MergeOutcome {
    AlreadyMerged(Oid),
    FastForward(Oid),
    Merged(Oid),
}

impl MergeOutcome {
    pub fn to_json(&self) -> Value {
        match self {
            MergeOutcome::AlreadyMerged(oid) => json!({ "oid": oid.to_string(), "alreadyMerged": true }),
            MergeOutcome::FastForward(oid) => json!({ "oid": oid.to_string(), "fastForward": true }),
            MergeOutcome::Merged(oid) => json!({ "oid": oid.to_string(), "mergeCommit": true }),
        }
    }
}

/// Merge `request.theirs` into the branch and check the result out.
///
/// `author` is only called when a merge commit has to be written.
pub(crate) fn merge_into_branch<F>(
    repo: &Repository,
    hooks: &BlockingHooks,
    request: &MergeRequest<'_>,
    author: F,
) -> Result<MergeOutcome, EngineError>
where
    F: FnOnce() -> Result<(Signature<'static>, Signature<'static>), EngineError>,
{
    let refname = format!("refs/heads/{}", request.branch);
    let previous = head_oid(repo).unwrap_or_else(Oid::zero);

    let ours = match repo.refname_to_id(&refname) {
        Ok(oid) => oid,
        Err(err) if err.code() == ErrorCode::NotFound => {
            switch_to(repo, hooks, request.theirs, &refname, previous)?;
            return Ok(MergeOutcome::FastForward(request.theirs));
        }
        Err(err) => return Err(err.into()),
    };

    if ours == request.theirs || repo.graph_descendant_of(ours, request.theirs)? {
        debug!(branch = request.branch, "Already up to date");
        return Ok(MergeOutcome::AlreadyMerged(ours));
    }

    if repo.graph_descendant_of(request.theirs, ours)? {
        info!(branch = request.branch, oid = %request.theirs, "Fast-forward");
        switch_to(repo, hooks, request.theirs, &refname, previous)?;
        return Ok(MergeOutcome::FastForward(request.theirs));
    }

    if request.fast_forward_only {
        return Err(EngineError::FastForwardRequired);
    }

    let our_commit = repo.find_commit(ours)?;
    let their_commit = repo.find_commit(request.theirs)?;
    let mut index = repo.merge_commits(&our_commit, &their_commit, None)?;
    if index.has_conflicts() {
        resolve_conflicts(repo, hooks, &mut index, request)?;
    }

    let tree = repo.find_tree(index.write_tree_to(repo)?)?;
    let message = request.message.map(str::to_string).unwrap_or_else(|| {
        format!("Merge branch '{}' into {}", request.their_label, request.branch)
    });
    let (author, committer) = author()?;
    let parents = [&our_commit, &their_commit];

    let oid = match request.signing_key {
        Some(secret_key) => {
            commit_signed(repo, hooks, secret_key, &author, &committer, &message, &tree, &parents)?
        }
        None => repo.commit(None, &author, &committer, &message, &tree, &parents)?,
    };

    info!(branch = request.branch, oid = %oid, "Created merge commit");
    switch_to(repo, hooks, oid, &refname, previous)?;
    Ok(MergeOutcome::Merged(oid))
}

#[allow(clippy::too_many_arguments)]
fn commit_signed(
    repo: &Repository,
    hooks: &BlockingHooks,
    secret_key: &str,
    author: &Signature<'_>,
    committer: &Signature<'_>,
    message: &str,
    tree: &git2::Tree<'_>,
    parents: &[&Commit<'_>],
) -> Result<Oid, EngineError> {
    let buffer = repo.commit_create_buffer(author, committer, message, tree, parents)?;
    let payload = buffer
        .as_str()
        .ok_or_else(|| EngineError::invalid("message", "commit is not valid UTF-8"))?
        .to_string();

    let signed = hooks.sign(&SignRequest {
        payload: payload.clone(),
        secret_key: secret_key.to_string(),
    })?;
    Ok(repo.commit_signed(&payload, &signed.signature, None)?)
}

fn conflict_path(conflict: &IndexConflict) -> Option<String> {
    [&conflict.our, &conflict.their, &conflict.ancestor]
        .into_iter()
        .flatten()
        .next()
        .map(|entry| String::from_utf8_lossy(&entry.path).into_owned())
}

fn blob_text(repo: &Repository, entry: Option<&IndexEntry>) -> Result<String, EngineError> {
    match entry {
        Some(entry) => {
            let blob = repo.find_blob(entry.id)?;
            Ok(String::from_utf8_lossy(blob.content()).into_owned())
        }
        None => Ok(String::new()),
    }
}

fn resolve_conflicts(
    repo: &Repository,
    hooks: &BlockingHooks,
    index: &mut Index,
    request: &MergeRequest<'_>,
) -> Result<(), EngineError> {
    let conflicts = index.conflicts()?.collect::<Result<Vec<_>, _>>()?;
    let mut unresolved = Vec::new();

    for conflict in conflicts {
        let Some(path) = conflict_path(&conflict) else {
            continue;
        };

        let resolution = hooks.merge(&MergeConflict {
            path: path.clone(),
            branches: [
                "base".to_string(),
                request.branch.to_string(),
                request.their_label.to_string(),
            ],
            contents: [
                blob_text(repo, conflict.ancestor.as_ref())?,
                blob_text(repo, conflict.our.as_ref())?,
                blob_text(repo, conflict.their.as_ref())?,
            ],
        })?;

        if !resolution.clean_merge {
            unresolved.push(path);
            continue;
        }

        let template = conflict
            .our
            .or(conflict.their)
            .or(conflict.ancestor)
            .ok_or_else(|| EngineError::NotFound(format!("index entry for {path}")))?;
        let merged = resolution.merged_text.into_bytes();
        let entry = IndexEntry {
            id: repo.blob(&merged)?,
            file_size: u32::try_from(merged.len()).unwrap_or(u32::MAX),
            flags: template.flags & !INDEX_STAGE_MASK,
            ..template
        };

        index.remove_path(Path::new(&path))?;
        index.add(&entry)?;
    }

    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(EngineError::MergeConflict(unresolved))
    }
}
