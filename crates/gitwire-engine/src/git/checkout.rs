// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use super::values::{head_oid, not_found, short_branch};
use super::{DEFAULT_REMOTE, EngineContext};
use crate::error::EngineError;
use crate::hooks::{BlockingHooks, CheckoutKind, PostCheckout, Progress};
use crate::params::Params;
use git2::build::CheckoutBuilder;
use git2::{BranchType, Object, Oid, Repository};
use serde_json::{Value, json};

const CHECKOUT_PHASE: &str = "Updating workdir";

fn checkout_builder<'cb>(hooks: &'cb BlockingHooks, force: bool) -> CheckoutBuilder<'cb> {
    let mut builder = CheckoutBuilder::new();
    if force {
        builder.force();
    } else {
        builder.safe();
    }
    builder.progress(move |_path, current, total| {
        hooks.progress(&Progress::new(CHECKOUT_PHASE, current as u64, Some(total as u64)));
    });
    builder
}

/// Check out `target`, then point HEAD at `refname` and report the move.
///
/// The tree is written before any ref moves so the checkout baseline is
/// still the old HEAD.
pub(crate) fn switch_to(
    repo: &Repository,
    hooks: &BlockingHooks,
    target: Oid,
    refname: &str,
    previous: Oid,
) -> Result<(), EngineError> {
    let object = repo.find_object(target, None)?;
    repo.checkout_tree(&object, Some(&mut checkout_builder(hooks, false)))?;
    repo.reference(refname, target, true, "gitwire: checkout")?;
    repo.set_head(refname)?;
    post_checkout(hooks, previous, target, CheckoutKind::Branch);
    Ok(())
}

fn post_checkout(hooks: &BlockingHooks, previous: Oid, new_head: Oid, kind: CheckoutKind) {
    hooks.post_checkout(&PostCheckout {
        previous_head: previous.to_string(),
        new_head: new_head.to_string(),
        kind,
    });
}

enum Target<'repo> {
    Branch(String, Object<'repo>),
    Detached(Object<'repo>),
}

/// Local branch, else a new branch tracking `<remote>/<ref>`, else any
/// revision (detached).
fn resolve_target<'repo>(
    repo: &'repo Repository,
    reference: &str,
    remote: &str,
) -> Result<Target<'repo>, EngineError> {
    let name = short_branch(reference);

    if let Ok(branch) = repo.find_branch(name, BranchType::Local) {
        let object = branch.get().peel(git2::ObjectType::Commit)?;
        return Ok(Target::Branch(format!("refs/heads/{name}"), object));
    }

    let upstream = format!("{remote}/{name}");
    if let Ok(remote_branch) = repo.find_branch(&upstream, BranchType::Remote) {
        let commit = remote_branch.get().peel_to_commit()?;
        let mut local = repo.branch(name, &commit, false)?;
        local.set_upstream(Some(upstream.as_str()))?;
        return Ok(Target::Branch(
            format!("refs/heads/{name}"),
            commit.into_object(),
        ));
    }

    let object = repo
        .revparse_single(reference)
        .map_err(not_found(format!("ref {reference}")))?;
    Ok(Target::Detached(object.peel(git2::ObjectType::Commit)?))
}

pub(crate) fn checkout(
    context: &EngineContext,
    hooks: &BlockingHooks,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    let dir = params.dir(&context.resolver)?;
    let repo = Repository::open(&dir)?;
    let reference = params.str("ref")?;
    let remote = params.opt_str("remote")?.unwrap_or(DEFAULT_REMOTE);
    let force = params.flag("force")?;
    let previous = head_oid(&repo).unwrap_or_else(Oid::zero);

    if params.get("filepaths").is_some() {
        let filepaths = params.str_list("filepaths")?;
        let object = repo
            .revparse_single(reference)
            .map_err(not_found(format!("ref {reference}")))?;
        let mut builder = checkout_builder(hooks, true);
        for path in &filepaths {
            builder.path(path.as_str());
        }
        repo.checkout_tree(&object, Some(&mut builder))?;
        let commit = object.peel_to_commit()?.id();
        post_checkout(hooks, previous, commit, CheckoutKind::File);
        return Ok(json!({ "ref": reference, "head": previous.to_string(), "filepaths": filepaths }));
    }

    let new_head = match resolve_target(&repo, reference, remote)? {
        Target::Branch(refname, object) => {
            repo.checkout_tree(&object, Some(&mut checkout_builder(hooks, force)))?;
            repo.set_head(&refname)?;
            object.id()
        }
        Target::Detached(object) => {
            repo.checkout_tree(&object, Some(&mut checkout_builder(hooks, force)))?;
            repo.set_head_detached(object.id())?;
            object.id()
        }
    };

    post_checkout(hooks, previous, new_head, CheckoutKind::Branch);
    Ok(json!({ "ref": reference, "head": new_head.to_string() }))
}
