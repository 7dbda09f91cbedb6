// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Short request/response commands

use super::EngineContext;
use super::values::{
    commit_json, current_branch, full_branch_ref, not_found, short_branch, signature,
};
use crate::error::EngineError;
use crate::operation::Command;
use crate::params::Params;
use git2::{
    BranchType, ErrorCode, IndexAddOption, ObjectType, Oid, Repository, RepositoryInitOptions,
    Sort, Status,
};
use serde_json::{Value, json};
use std::path::Path;

/// Commands the libgit2 engine answers; the rest are refused up front.
fn is_supported(command: Command) -> bool {
    matches!(
        command,
        Command::Init
            | Command::Commit
            | Command::Log
            | Command::CurrentBranch
            | Command::CreateBranch
            | Command::DeleteBranch
            | Command::RenameBranch
            | Command::ListBranches
            | Command::Tag
            | Command::AnnotatedTag
            | Command::DeleteTag
            | Command::ListTags
            | Command::Add
            | Command::Remove
            | Command::ListFiles
            | Command::Status
            | Command::IsIgnored
            | Command::ReadFile
            | Command::AddRemote
            | Command::DeleteRemote
            | Command::ListRemotes
            | Command::GetConfig
            | Command::GetConfigAll
            | Command::SetConfig
            | Command::FindRoot
            | Command::ResolveRef
            | Command::ExpandRef
            | Command::ListRefs
            | Command::WriteRef
            | Command::DeleteRef
            | Command::HashBlob
            | Command::IsDescendent
    )
}

pub(crate) fn execute(
    context: &EngineContext,
    command: Command,
    params: Params<'_>,
) -> Result<Value, EngineError> {
    if !is_supported(command) {
        return Err(EngineError::Unsupported(command.as_str().to_string()));
    }

    match command {
        Command::Init => return init(context, params),
        Command::FindRoot => return find_root(context, params),
        Command::HashBlob => return hash_blob(params),
        _ => {}
    }

    let dir = params.dir(&context.resolver)?;
    let repo = Repository::open(&dir)?;

    match command {
        Command::Commit => commit(&repo, params),
        Command::Log => log(&repo, params),
        Command::CurrentBranch => {
            let fullname = params.flag("fullname")?;
            Ok(json!(current_branch(&repo)?.map(|name| {
                if fullname { full_branch_ref(&name) } else { name }
            })))
        }
        Command::CreateBranch => create_branch(&repo, params),
        Command::DeleteBranch => {
            let name = short_branch(params.str("ref")?);
            repo.find_branch(name, BranchType::Local)
                .map_err(not_found(format!("branch {name}")))?
                .delete()?;
            Ok(Value::Null)
        }
        Command::RenameBranch => {
            let old = short_branch(params.str("oldref")?);
            let new = short_branch(params.str("ref")?);
            let mut branch = repo
                .find_branch(old, BranchType::Local)
                .map_err(not_found(format!("branch {old}")))?;
            branch.rename(new, false)?;
            Ok(Value::Null)
        }
        Command::ListBranches => list_branches(&repo, params),
        Command::Tag => {
            let name = params.str("ref")?;
            let target = repo.revparse_single(params.opt_str("object")?.unwrap_or("HEAD"))?;
            repo.tag_lightweight(name, &target, params.flag("force")?)?;
            Ok(Value::Null)
        }
        Command::AnnotatedTag => {
            let name = params.str("ref")?;
            let target = repo.revparse_single(params.opt_str("object")?.unwrap_or("HEAD"))?;
            let tagger = signature(&repo, &params, "tagger")?;
            let message = params.opt_str("message")?.unwrap_or(name);
            repo.tag(name, &target, &tagger, message, params.flag("force")?)?;
            Ok(Value::Null)
        }
        Command::DeleteTag => {
            let name = params.str("ref")?;
            repo.tag_delete(name).map_err(not_found(format!("tag {name}")))?;
            Ok(Value::Null)
        }
        Command::ListTags => {
            let tags = repo.tag_names(None)?;
            Ok(json!(tags.iter().flatten().collect::<Vec<_>>()))
        }
        Command::Add => {
            let paths = params.str_list("filepath")?;
            let mut index = repo.index()?;
            index.add_all(paths.iter().map(String::as_str), IndexAddOption::DEFAULT, None)?;
            index.write()?;
            Ok(Value::Null)
        }
        Command::Remove => {
            let path = params.str("filepath")?;
            let mut index = repo.index()?;
            index.remove_path(Path::new(path))?;
            index.write()?;
            Ok(Value::Null)
        }
        Command::ListFiles => list_files(&repo, params),
        Command::Status => file_status(&repo, params.str("filepath")?),
        Command::IsIgnored => Ok(json!(repo.status_should_ignore(Path::new(params.str("filepath")?))?)),
        Command::ReadFile => read_file(&repo, params),
        Command::AddRemote => {
            let name = params.str("remote")?;
            let url = params.str("url")?;
            if params.flag("force")? && repo.find_remote(name).is_ok() {
                repo.remote_delete(name)?;
            }
            repo.remote(name, url)?;
            Ok(Value::Null)
        }
        Command::DeleteRemote => {
            let name = params.str("remote")?;
            repo.remote_delete(name).map_err(not_found(format!("remote {name}")))?;
            Ok(Value::Null)
        }
        Command::ListRemotes => {
            let mut remotes = Vec::new();
            for name in repo.remotes()?.iter().flatten() {
                let remote = repo.find_remote(name)?;
                remotes.push(json!({ "remote": name, "url": remote.url() }));
            }
            Ok(Value::Array(remotes))
        }
        Command::GetConfig => {
            let config = repo.config()?.snapshot()?;
            match config.get_string(params.str("path")?) {
                Ok(value) => Ok(json!(value)),
                Err(err) if err.code() == ErrorCode::NotFound => Ok(Value::Null),
                Err(err) => Err(err.into()),
            }
        }
        Command::GetConfigAll => {
            let config = repo.config()?;
            let mut values = Vec::new();
            let mut entries = config.multivar(params.str("path")?, None)?;
            while let Some(entry) = entries.next() {
                if let Some(value) = entry?.value() {
                    values.push(value.to_string());
                }
            }
            Ok(json!(values))
        }
        Command::SetConfig => set_config(&repo, params),
        Command::ResolveRef => {
            let reference = params.str("ref")?;
            let oid = repo
                .revparse_single(reference)
                .map_err(not_found(format!("ref {reference}")))?
                .id();
            Ok(json!(oid.to_string()))
        }
        Command::ExpandRef => {
            let reference = params.str("ref")?;
            let full = repo
                .resolve_reference_from_short_name(reference)
                .map_err(not_found(format!("ref {reference}")))?;
            Ok(json!(full.name()))
        }
        Command::ListRefs => {
            let prefix = params.opt_str("filepath")?.unwrap_or("refs");
            let prefix = format!("{}/", prefix.trim_end_matches('/'));
            let mut names = Vec::new();
            for reference in repo.references()? {
                if let Some(name) = reference?.name() {
                    if let Some(rest) = name.strip_prefix(&prefix) {
                        names.push(rest.to_string());
                    }
                }
            }
            names.sort();
            Ok(json!(names))
        }
        Command::WriteRef => {
            let name = params.str("ref")?;
            let value = params.str("value")?;
            let force = params.flag("force")?;
            if params.flag("symbolic")? {
                repo.reference_symbolic(name, value, force, "gitwire: writeRef")?;
            } else {
                let oid = repo.revparse_single(value)?.id();
                repo.reference(name, oid, force, "gitwire: writeRef")?;
            }
            Ok(Value::Null)
        }
        Command::DeleteRef => {
            let name = params.str("ref")?;
            repo.find_reference(name)
                .map_err(not_found(format!("ref {name}")))?
                .delete()?;
            Ok(Value::Null)
        }
        Command::IsDescendent => {
            let oid = Oid::from_str(params.str("oid")?)
                .map_err(|err| EngineError::invalid("oid", err.to_string()))?;
            let ancestor = Oid::from_str(params.str("ancestor")?)
                .map_err(|err| EngineError::invalid("ancestor", err.to_string()))?;
            Ok(json!(repo.graph_descendant_of(oid, ancestor)?))
        }
        other => Err(EngineError::Unsupported(other.as_str().to_string())),
    }
}

fn init(context: &EngineContext, params: Params<'_>) -> Result<Value, EngineError> {
    let dir = params.dir(&context.resolver)?;
    let mut options = RepositoryInitOptions::new();
    options
        .bare(params.flag("bare")?)
        .initial_head(params.opt_str("defaultBranch")?.unwrap_or("master"));
    Repository::init_opts(&dir, &options)?;
    Ok(Value::Null)
}

fn find_root(context: &EngineContext, params: Params<'_>) -> Result<Value, EngineError> {
    let start = context.resolver.resolve(params.str("filepath")?)?;
    let repo = Repository::discover(&start)
        .map_err(not_found(format!("git root for {}", start.display())))?;
    let root = repo.workdir().unwrap_or_else(|| repo.path());
    Ok(json!(root.to_string_lossy().trim_end_matches('/')))
}

fn hash_blob(params: Params<'_>) -> Result<Value, EngineError> {
    let object = params.str("object")?;
    let oid = Oid::hash_object(ObjectType::Blob, object.as_bytes())?;
    Ok(json!({ "oid": oid.to_string(), "type": "blob" }))
}

fn commit(repo: &Repository, params: Params<'_>) -> Result<Value, EngineError> {
    let message = params.str("message")?;
    let author = signature(repo, &params, "author")?;
    let committer = match params.get("committer") {
        Some(_) => signature(repo, &params, "committer")?,
        None => author.clone(),
    };
    let update_ref = params
        .opt_str("ref")?
        .map(full_branch_ref)
        .unwrap_or_else(|| "HEAD".to_string());

    let mut index = repo.index()?;
    let tree = repo.find_tree(index.write_tree()?)?;
    let parent = match repo.revparse_single(&update_ref) {
        Ok(object) => Some(object.peel_to_commit()?),
        Err(err) if matches!(err.code(), ErrorCode::NotFound | ErrorCode::UnbornBranch) => None,
        Err(err) => return Err(err.into()),
    };
    let parents: Vec<_> = parent.iter().collect();

    let oid = repo.commit(Some(&update_ref), &author, &committer, message, &tree, &parents)?;
    Ok(json!(oid.to_string()))
}

fn log(repo: &Repository, params: Params<'_>) -> Result<Value, EngineError> {
    let reference = params.opt_str("ref")?.unwrap_or("HEAD");
    let depth = params.opt_u32("depth")?.map(|d| d as usize);
    let start = repo
        .revparse_single(reference)
        .map_err(not_found(format!("ref {reference}")))?
        .peel_to_commit()?;

    let mut walk = repo.revwalk()?;
    walk.set_sorting(Sort::TIME)?;
    walk.push(start.id())?;

    let mut entries = Vec::new();
    for oid in walk.take(depth.unwrap_or(usize::MAX)) {
        entries.push(commit_json(&repo.find_commit(oid?)?));
    }
    Ok(Value::Array(entries))
}

fn create_branch(repo: &Repository, params: Params<'_>) -> Result<Value, EngineError> {
    let name = short_branch(params.str("ref")?);
    let start = params.opt_str("object")?.unwrap_or("HEAD");
    let commit = repo
        .revparse_single(start)
        .map_err(not_found(format!("ref {start}")))?
        .peel_to_commit()?;
    let branch = repo.branch(name, &commit, params.flag("force")?)?;

    if params.flag("checkout")? {
        if let Some(refname) = branch.get().name() {
            repo.set_head(refname)?;
        }
    }
    Ok(Value::Null)
}

fn list_branches(repo: &Repository, params: Params<'_>) -> Result<Value, EngineError> {
    let (kind, prefix) = match params.opt_str("remote")? {
        Some(remote) => (BranchType::Remote, format!("{remote}/")),
        None => (BranchType::Local, String::new()),
    };

    let mut names = Vec::new();
    for branch in repo.branches(Some(kind))? {
        let (branch, _) = branch?;
        if let Some(name) = branch.name()? {
            if let Some(rest) = name.strip_prefix(prefix.as_str()) {
                if rest != "HEAD" {
                    names.push(rest.to_string());
                }
            }
        }
    }
    names.sort();
    Ok(json!(names))
}

fn list_files(repo: &Repository, params: Params<'_>) -> Result<Value, EngineError> {
    let mut files = Vec::new();
    match params.opt_str("ref")? {
        Some(reference) => {
            let tree = repo
                .revparse_single(reference)
                .map_err(not_found(format!("ref {reference}")))?
                .peel_to_tree()?;
            tree.walk(git2::TreeWalkMode::PreOrder, |root, entry| {
                if entry.kind() == Some(ObjectType::Blob) {
                    if let Some(name) = entry.name() {
                        files.push(format!("{root}{name}"));
                    }
                }
                git2::TreeWalkResult::Ok
            })?;
        }
        None => {
            for entry in repo.index()?.iter() {
                files.push(String::from_utf8_lossy(&entry.path).into_owned());
            }
        }
    }
    Ok(json!(files))
}

/// Single-file status in the vocabulary clients expect
fn file_status(repo: &Repository, path: &str) -> Result<Value, EngineError> {
    let status = match repo.status_file(Path::new(path)) {
        Ok(status) => status,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(json!("absent")),
        Err(err) => return Err(err.into()),
    };

    let label = if status.is_empty() {
        "unmodified"
    } else if status.contains(Status::IGNORED) {
        "ignored"
    } else if status.contains(Status::WT_NEW) {
        "*added"
    } else if status.contains(Status::INDEX_NEW) {
        if status.contains(Status::WT_DELETED) {
            "*absent"
        } else if status.contains(Status::WT_MODIFIED) {
            "*added"
        } else {
            "added"
        }
    } else if status.contains(Status::INDEX_DELETED) {
        "deleted"
    } else if status.contains(Status::WT_DELETED) {
        "*deleted"
    } else if status.contains(Status::WT_MODIFIED) {
        "*modified"
    } else if status.contains(Status::INDEX_MODIFIED) {
        "modified"
    } else {
        "*unmodified"
    };
    Ok(json!(label))
}

/// File contents at a ref, `null` when the path does not exist there
fn read_file(repo: &Repository, params: Params<'_>) -> Result<Value, EngineError> {
    let filepath = params.str("filepath")?;
    let reference = params.opt_str("ref")?.unwrap_or("HEAD");
    let tree = repo
        .revparse_single(reference)
        .map_err(not_found(format!("ref {reference}")))?
        .peel_to_tree()?;

    let entry = match tree.get_path(Path::new(filepath)) {
        Ok(entry) => entry,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(Value::Null),
        Err(err) => return Err(err.into()),
    };
    let blob = repo.find_blob(entry.id())?;
    Ok(json!(String::from_utf8_lossy(blob.content())))
}

fn set_config(repo: &Repository, params: Params<'_>) -> Result<Value, EngineError> {
    let path = params.str("path")?;
    let mut config = repo.config()?.open_level(git2::ConfigLevel::Local)?;
    match params.get("value") {
        None => match config.remove(path) {
            Ok(()) => {}
            Err(err) if err.code() == ErrorCode::NotFound => {}
            Err(err) => return Err(err.into()),
        },
        Some(Value::Bool(value)) => config.set_bool(path, *value)?,
        Some(Value::Number(number)) => match number.as_i64() {
            Some(value) => config.set_i64(path, value)?,
            None => config.set_str(path, &number.to_string())?,
        },
        Some(Value::String(value)) => config.set_str(path, value)?,
        Some(_) => {
            return Err(EngineError::invalid(
                "value",
                "expected a string, number, boolean or null",
            ));
        }
    }
    Ok(Value::Null)
}
