// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Network operations: clone, fetch, push, pull and remote listing

use super::merge::{MergeRequest, merge_into_branch};
use super::values::{current_branch, full_branch_ref, head_oid, not_found, short_branch, signature};
use super::{DEFAULT_REMOTE, EngineContext, Transfer, header_lines};
use crate::error::EngineError;
use crate::hooks::{BlockingHooks, CheckoutKind, PostCheckout};
use crate::params::Params;
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Direction, FetchOptions, FetchPrune, Oid, Remote, RemoteHead, Repository};
use serde_json::{Map, Value, json};
use tracing::info;

fn apply_depth(options: &mut FetchOptions<'_>, params: &Params<'_>) -> Result<(), EngineError> {
    if let Some(depth) = params.opt_u32("depth")? {
        let depth = i32::try_from(depth).map_err(|_| EngineError::invalid("depth", "too large"))?;
        options.depth(depth);
    }
    Ok(())
}

/// Named remote, or an anonymous one when the payload carries a `url`
fn open_remote<'repo>(
    repo: &'repo Repository,
    name: &str,
    url: Option<&str>,
) -> Result<Remote<'repo>, EngineError> {
    match url {
        Some(url) => Ok(repo.remote_anonymous(url)?),
        None => repo
            .find_remote(name)
            .map_err(not_found(format!("remote {name}"))),
    }
}

fn tracking_refspec(remote: &str, branch: &str) -> String {
    format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}")
}

pub(crate) fn clone(
    context: &EngineContext,
    hooks: &BlockingHooks,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    let dir = params.dir(&context.resolver)?;
    let url = params.str("url")?;
    let remote_name = params.opt_str("remote")?.unwrap_or(DEFAULT_REMOTE);
    let branch = params.opt_str("ref")?.map(short_branch);
    let single_branch = params.flag("singleBranch")?;
    let no_checkout = params.flag("noCheckout")?;
    let headers = header_lines(&params)?;

    info!(url, dir = %dir.display(), "Cloning repository");
    let transfer = Transfer::new(hooks);
    let mut fetch = context.fetch_options(&transfer, &headers);
    apply_depth(&mut fetch, &params)?;

    let mut checkout = CheckoutBuilder::new();
    if no_checkout {
        checkout.dry_run();
    }
    checkout.progress(|_path, current, total| transfer.step("Updating workdir", current, total));

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch).with_checkout(checkout);
    if let Some(branch) = branch {
        builder.branch(branch);
    }
    builder.remote_create(move |repo, _name, url| match branch.filter(|_| single_branch) {
        Some(branch) => repo.remote_with_fetch(remote_name, url, &tracking_refspec(remote_name, branch)),
        None => repo.remote(remote_name, url),
    });

    let repo = builder.clone(url, &dir).map_err(|err| transfer.error(err))?;
    transfer.finish();

    let head = head_oid(&repo);
    if let (Some(head), false) = (head, no_checkout) {
        hooks.post_checkout(&PostCheckout {
            previous_head: Oid::zero().to_string(),
            new_head: head.to_string(),
            kind: CheckoutKind::Branch,
        });
    }

    Ok(json!({
        "dir": dir,
        "remote": remote_name,
        "branch": current_branch(&repo)?,
        "head": head.map(|oid| oid.to_string()),
    }))
}

pub(crate) fn fetch(
    context: &EngineContext,
    hooks: &BlockingHooks,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    let dir = params.dir(&context.resolver)?;
    let repo = git2::Repository::open(&dir)?;
    let remote_name = params.opt_str("remote")?.unwrap_or(DEFAULT_REMOTE);
    let branch = params.opt_str("ref")?.map(short_branch);
    let headers = header_lines(&params)?;
    let mut remote = open_remote(&repo, remote_name, params.opt_str("url")?)?;

    let refspecs: Vec<String> = branch
        .map(|branch| vec![tracking_refspec(remote_name, branch)])
        .unwrap_or_default();

    let transfer = Transfer::new(hooks);
    let mut options = context.fetch_options(&transfer, &headers);
    apply_depth(&mut options, &params)?;
    if params.flag("prune")? {
        options.prune(FetchPrune::On);
    }

    remote
        .fetch(refspecs.as_slice(), Some(&mut options), None)
        .map_err(|err| transfer.error(err))?;
    transfer.finish();

    let stats = remote.stats();
    let fetch_head = match branch {
        Some(branch) => repo.refname_to_id(&format!("refs/remotes/{remote_name}/{branch}")),
        None => repo.refname_to_id("FETCH_HEAD"),
    }
    .ok();

    Ok(json!({
        "fetchHead": fetch_head.map(|oid| oid.to_string()),
        "receivedObjects": stats.received_objects(),
        "totalObjects": stats.total_objects(),
    }))
}

pub(crate) fn push(
    context: &EngineContext,
    hooks: &BlockingHooks,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    let dir = params.dir(&context.resolver)?;
    let repo = git2::Repository::open(&dir)?;
    let remote_name = params.opt_str("remote")?.unwrap_or(DEFAULT_REMOTE);
    let url = params.opt_str("url")?;
    let reference = match params.opt_str("ref")? {
        Some(reference) => reference.to_string(),
        None => current_branch(&repo)?.ok_or(EngineError::MissingParameter("ref"))?,
    };
    let remote_ref = params.opt_str("remoteRef")?.unwrap_or(&reference).to_string();
    let force = params.flag("force")?;
    let delete = params.flag("delete")?;
    let headers = header_lines(&params)?;

    let local = full_branch_ref(&reference);
    let destination = full_branch_ref(&remote_ref);
    let refspec = if delete {
        format!(":{destination}")
    } else {
        format!("{}{local}:{destination}", if force { "+" } else { "" })
    };

    info!(remote = remote_name, refspec = %refspec, "Pushing");
    let mut remote = open_remote(&repo, remote_name, url)?;
    let transfer = Transfer::new(hooks);
    let mut options = context.push_options(&transfer, &headers);
    remote
        .push(&[refspec.as_str()], Some(&mut options))
        .map_err(|err| transfer.error(err))?;
    transfer.finish();

    let rejections = transfer.take_rejections();
    if !rejections.is_empty() {
        return Err(EngineError::PushRejected(rejections));
    }

    // Keep the remote-tracking ref in step, as `git push` does
    if url.is_none() {
        let tracking = format!("refs/remotes/{remote_name}/{}", short_branch(&destination));
        if delete {
            if let Ok(mut tracking_ref) = repo.find_reference(&tracking) {
                tracking_ref.delete()?;
            }
        } else if let Ok(oid) = repo.refname_to_id(&local) {
            repo.reference(&tracking, oid, true, "update by push")?;
        }
    }

    let mut refs = Map::new();
    refs.insert(destination, json!({ "ok": true }));
    Ok(json!({ "ok": true, "error": null, "refs": refs }))
}

pub(crate) fn pull(
    context: &EngineContext,
    hooks: &BlockingHooks,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    let dir = params.dir(&context.resolver)?;
    let repo = git2::Repository::open(&dir)?;
    let remote_name = params.opt_str("remote")?.unwrap_or(DEFAULT_REMOTE);
    let branch = match params.opt_str("ref")? {
        Some(reference) => short_branch(reference).to_string(),
        None => current_branch(&repo)?.ok_or(EngineError::MissingParameter("ref"))?,
    };
    let remote_branch = params
        .opt_str("remoteRef")?
        .map(short_branch)
        .unwrap_or(&branch)
        .to_string();
    let headers = header_lines(&params)?;

    {
        let mut remote = open_remote(&repo, remote_name, params.opt_str("url")?)?;
        let transfer = Transfer::new(hooks);
        let mut options = context.fetch_options(&transfer, &headers);
        remote
            .fetch(
                &[tracking_refspec(remote_name, &remote_branch)],
                Some(&mut options),
                None,
            )
            .map_err(|err| transfer.error(err))?;
        transfer.finish();
    }

    let tracking = format!("refs/remotes/{remote_name}/{remote_branch}");
    let theirs = repo
        .refname_to_id(&tracking)
        .map_err(not_found(format!("ref {tracking}")))?;
    let their_label = format!("{remote_name}/{remote_branch}");

    let request = MergeRequest {
        branch: &branch,
        theirs,
        their_label: &their_label,
        fast_forward_only: params.flag("fastForwardOnly")?,
        message: params.opt_str("message")?,
        signing_key: params.opt_str("signingKey")?,
    };
    let outcome = merge_into_branch(&repo, hooks, &request, || {
        let author = signature(&repo, &params, "author")?;
        let committer = match params.get("committer") {
            Some(_) => signature(&repo, &params, "committer")?,
            None => author.clone(),
        };
        Ok((author, committer))
    })?;

    Ok(outcome.to_json())
}

fn remote_heads(
    context: &EngineContext,
    hooks: &BlockingHooks,
    url: &str,
    mut visit: impl FnMut(&RemoteHead<'_>),
) -> Result<Option<String>, EngineError> {
    let mut remote = Remote::create_detached(url)?;
    let transfer = Transfer::new(hooks);
    let connection = remote
        .connect_auth(
            Direction::Fetch,
            Some(transfer.callbacks()),
            Some(context.proxy_options()),
        )
        .map_err(|err| transfer.error(err))?;
    transfer.finish();

    for head in connection.list()? {
        visit(head);
    }
    let default_branch = connection
        .default_branch()
        .ok()
        .and_then(|name| name.as_str().map(str::to_string));
    Ok(default_branch)
}

pub(crate) fn get_remote_info(
    context: &EngineContext,
    hooks: &BlockingHooks,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    let url = params.str("url")?;
    let mut heads = Map::new();
    let mut tags = Map::new();
    let mut pull = Map::new();

    let default_branch = remote_heads(context, hooks, url, |head| {
        let oid = Value::String(head.oid().to_string());
        let name = head.name();
        if let Some(branch) = name.strip_prefix("refs/heads/") {
            heads.insert(branch.to_string(), oid);
        } else if let Some(tag) = name.strip_prefix("refs/tags/") {
            tags.insert(tag.to_string(), oid);
        } else if let Some(request) = name.strip_prefix("refs/pull/") {
            pull.insert(request.to_string(), oid);
        }
    })?;

    Ok(json!({
        "HEAD": default_branch,
        "refs": { "heads": heads, "tags": tags, "pull": pull },
    }))
}

pub(crate) fn list_server_refs(
    context: &EngineContext,
    hooks: &BlockingHooks,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    let url = params.str("url")?;
    let prefix = params.opt_str("prefix")?;
    let symrefs = params.flag("symrefs")?;
    let mut refs = Vec::new();

    remote_heads(context, hooks, url, |head| {
        if prefix.is_some_and(|prefix| !head.name().starts_with(prefix)) {
            return;
        }
        let mut entry = json!({ "ref": head.name(), "oid": head.oid().to_string() });
        if let (true, Some(target)) = (symrefs, head.symref_target()) {
            entry["target"] = Value::String(target.to_string());
        }
        refs.push(entry);
    })?;

    Ok(Value::Array(refs))
}
