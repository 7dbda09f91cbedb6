// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! GitEngine against real repositories on disk, remotes over the local transport

use async_trait::async_trait;
use git2::{Commit, Oid, Repository, RepositoryInitOptions, Signature};
use gitwire_engine::{
    Command, Engine, EngineError, Environment, GitAuth, GitEngine, GitEngineConfig, HookError,
    MergeConflict, OperationHooks, PathError, PathResolver, PostCheckout, Progress, SignRequest,
    StreamOperation,
};
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingHooks {
    merge_reply: Option<Value>,
    sign_reply: Option<Value>,
    post_checkouts: Mutex<Vec<PostCheckout>>,
    conflicts: Mutex<Vec<MergeConflict>>,
    sign_requests: Mutex<Vec<SignRequest>>,
    progress: Mutex<Vec<Progress>>,
}

#[async_trait]
impl OperationHooks for RecordingHooks {
    fn on_progress(&self, progress: &Progress) {
        self.progress.lock().unwrap().push(progress.clone());
    }

    fn on_message(&self, _message: &str) {}

    async fn on_auth(&self, _url: &str, _auth: &GitAuth) -> Result<Value, HookError> {
        Ok(json!({}))
    }

    fn on_auth_success(&self, _url: &str, _auth: &GitAuth) {}

    async fn on_auth_failure(&self, _url: &str, _auth: &GitAuth) -> Result<Value, HookError> {
        Ok(json!({ "cancel": true }))
    }

    fn on_post_checkout(&self, checkout: &PostCheckout) {
        self.post_checkouts.lock().unwrap().push(checkout.clone());
    }

    async fn on_sign(&self, request: &SignRequest) -> Result<Value, HookError> {
        self.sign_requests.lock().unwrap().push(request.clone());
        Ok(self.sign_reply.clone().unwrap_or(Value::Null))
    }

    async fn merge_driver(&self, conflict: &MergeConflict) -> Result<Value, HookError> {
        self.conflicts.lock().unwrap().push(conflict.clone());
        Ok(self.merge_reply.clone().unwrap_or(Value::Null))
    }
}

fn engine() -> GitEngine {
    GitEngine::new(GitEngineConfig::default(), PathResolver::for_host(Environment::Unknown))
}

fn path_str(path: &Path) -> String {
    path.to_str().unwrap().to_string()
}

fn init_repo(path: &Path, bare: bool) -> Repository {
    let mut options = RepositoryInitOptions::new();
    options.initial_head("main").bare(bare);
    Repository::init_opts(path, &options).unwrap()
}

fn commit_file(repo: &Repository, name: &str, contents: &str, message: &str) -> Oid {
    let workdir = repo.workdir().unwrap();
    fs::write(workdir.join(name), contents).unwrap();
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(name)).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let sig = Signature::now("Test", "test@example.com").unwrap();
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&Commit> = parent.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
        .unwrap()
}

fn author() -> Value {
    json!({ "name": "Merger", "email": "merger@example.com" })
}

/// Upstream with one commit and a clone of it made through the engine
async fn upstream_and_clone(
    tmp: &Path,
    hooks: Arc<RecordingHooks>,
) -> (Repository, Repository, Value) {
    let upstream = init_repo(&tmp.join("upstream"), false);
    commit_file(&upstream, "a.txt", "base\n", "base");

    let local_dir = tmp.join("local");
    let result = engine()
        .run(
            StreamOperation::Clone,
            json!({ "dir": path_str(&local_dir), "url": path_str(&tmp.join("upstream")) }),
            hooks,
        )
        .await
        .unwrap();
    let local = Repository::open(&local_dir).unwrap();
    (upstream, local, result)
}

#[tokio::test(flavor = "multi_thread")]
async fn clone_checks_out_and_reports_post_checkout() {
    let tmp = tempfile::tempdir().unwrap();
    let hooks = Arc::new(RecordingHooks::default());
    let (upstream, local, result) = upstream_and_clone(tmp.path(), hooks.clone()).await;

    let upstream_head = upstream.head().unwrap().target().unwrap().to_string();
    assert_eq!(result["branch"], "main");
    assert_eq!(result["head"], upstream_head.as_str());
    assert_eq!(
        fs::read_to_string(local.workdir().unwrap().join("a.txt")).unwrap(),
        "base\n"
    );

    let checkouts = hooks.post_checkouts.lock().unwrap();
    assert_eq!(checkouts.len(), 1);
    assert_eq!(checkouts[0].previous_head, Oid::zero().to_string());
    assert_eq!(checkouts[0].new_head, upstream_head);
}

#[tokio::test(flavor = "multi_thread")]
async fn push_then_list_remote_refs() {
    let tmp = tempfile::tempdir().unwrap();
    let origin_dir = tmp.path().join("origin.git");
    init_repo(&origin_dir, true);
    let work_dir = tmp.path().join("work");
    let work = init_repo(&work_dir, false);
    let head = commit_file(&work, "readme.md", "hello\n", "initial");

    let engine = engine();
    engine
        .execute(
            Command::AddRemote,
            json!({ "dir": path_str(&work_dir), "remote": "origin", "url": path_str(&origin_dir) }),
        )
        .await
        .unwrap();

    let pushed = engine
        .run(
            StreamOperation::Push,
            json!({ "dir": path_str(&work_dir), "ref": "main" }),
            Arc::new(RecordingHooks::default()),
        )
        .await
        .unwrap();
    assert_eq!(pushed["ok"], true);
    assert_eq!(pushed["refs"]["refs/heads/main"]["ok"], true);
    assert_eq!(
        work.refname_to_id("refs/remotes/origin/main").unwrap(),
        head
    );

    let refs = engine
        .run(
            StreamOperation::ListServerRefs,
            json!({ "url": path_str(&origin_dir), "prefix": "refs/heads/" }),
            Arc::new(RecordingHooks::default()),
        )
        .await
        .unwrap();
    assert_eq!(refs, json!([{ "ref": "refs/heads/main", "oid": head.to_string() }]));

    let info = engine
        .run(
            StreamOperation::GetRemoteInfo,
            json!({ "url": path_str(&origin_dir) }),
            Arc::new(RecordingHooks::default()),
        )
        .await
        .unwrap();
    assert_eq!(info["refs"]["heads"]["main"], head.to_string());
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_sends_conflicts_to_the_merge_driver() {
    let tmp = tempfile::tempdir().unwrap();
    let (upstream, local, _) =
        upstream_and_clone(tmp.path(), Arc::new(RecordingHooks::default())).await;
    commit_file(&upstream, "a.txt", "theirs\n", "upstream change");
    commit_file(&local, "a.txt", "ours\n", "local change");

    let hooks = Arc::new(RecordingHooks {
        merge_reply: Some(json!({ "cleanMerge": true, "mergedText": "resolved\n" })),
        ..Default::default()
    });
    let result = engine()
        .run(
            StreamOperation::Pull,
            json!({ "dir": path_str(local.workdir().unwrap()), "author": author() }),
            hooks.clone(),
        )
        .await
        .unwrap();
    assert_eq!(result["mergeCommit"], true);

    let conflicts = hooks.conflicts.lock().unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].path, "a.txt");
    assert_eq!(conflicts[0].contents, ["base\n", "ours\n", "theirs\n"].map(String::from));
    assert_eq!(conflicts[0].branches[2], "origin/main");

    let head = local.head().unwrap().peel_to_commit().unwrap();
    assert_eq!(head.parent_count(), 2);
    assert_eq!(head.author().name(), Some("Merger"));
    assert_eq!(
        fs::read_to_string(local.workdir().unwrap().join("a.txt")).unwrap(),
        "resolved\n"
    );
    let reopened = Repository::open(local.workdir().unwrap()).unwrap();
    assert!(!reopened.index().unwrap().has_conflicts());
    let merged = head.tree().unwrap().get_path(Path::new("a.txt")).unwrap();
    assert_eq!(local.find_blob(merged.id()).unwrap().content(), b"resolved\n");
    assert_eq!(hooks.post_checkouts.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn unresolved_conflicts_fail_the_pull() {
    let tmp = tempfile::tempdir().unwrap();
    let (upstream, local, _) =
        upstream_and_clone(tmp.path(), Arc::new(RecordingHooks::default())).await;
    commit_file(&upstream, "a.txt", "theirs\n", "upstream change");
    let before = commit_file(&local, "a.txt", "ours\n", "local change");

    let hooks = Arc::new(RecordingHooks {
        merge_reply: Some(json!({ "cleanMerge": false })),
        ..Default::default()
    });
    let err = engine()
        .run(
            StreamOperation::Pull,
            json!({ "dir": path_str(local.workdir().unwrap()), "author": author() }),
            hooks,
        )
        .await
        .unwrap_err();

    assert!(matches!(&err, EngineError::MergeConflict(paths) if paths == &["a.txt".to_string()]));
    assert_eq!(err.status(), 409);
    assert_eq!(local.head().unwrap().target(), Some(before));
}

#[tokio::test(flavor = "multi_thread")]
async fn signed_merge_commit_carries_client_signature() {
    let tmp = tempfile::tempdir().unwrap();
    let (upstream, local, _) =
        upstream_and_clone(tmp.path(), Arc::new(RecordingHooks::default())).await;
    commit_file(&upstream, "b.txt", "upstream\n", "upstream file");
    commit_file(&local, "c.txt", "local\n", "local file");

    let signature = "-----BEGIN PGP SIGNATURE-----\n\nfake\n-----END PGP SIGNATURE-----";
    let hooks = Arc::new(RecordingHooks {
        sign_reply: Some(json!({ "signature": signature })),
        ..Default::default()
    });
    engine()
        .run(
            StreamOperation::Pull,
            json!({
                "dir": path_str(local.workdir().unwrap()),
                "author": author(),
                "signingKey": "secret"
            }),
            hooks.clone(),
        )
        .await
        .unwrap();

    let requests = hooks.sign_requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].secret_key, "secret");
    assert!(requests[0].payload.contains("Merge branch 'origin/main' into main"));

    let head = local.head().unwrap().target().unwrap();
    let (stored, _) = local.extract_signature(&head, None).unwrap();
    assert_eq!(stored.as_str(), Some(signature));
    assert!(local.workdir().unwrap().join("b.txt").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn fast_forward_only_refuses_divergent_history() {
    let tmp = tempfile::tempdir().unwrap();
    let (upstream, local, _) =
        upstream_and_clone(tmp.path(), Arc::new(RecordingHooks::default())).await;
    commit_file(&upstream, "b.txt", "upstream\n", "upstream file");
    commit_file(&local, "c.txt", "local\n", "local file");

    let err = engine()
        .run(
            StreamOperation::Pull,
            json!({ "dir": path_str(local.workdir().unwrap()), "fastForwardOnly": true }),
            Arc::new(RecordingHooks::default()),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::FastForwardRequired));
}

#[tokio::test(flavor = "multi_thread")]
async fn pull_fast_forwards_when_possible() {
    let tmp = tempfile::tempdir().unwrap();
    let (upstream, local, _) =
        upstream_and_clone(tmp.path(), Arc::new(RecordingHooks::default())).await;
    let tip = commit_file(&upstream, "b.txt", "upstream\n", "upstream file");

    let result = engine()
        .run(
            StreamOperation::Pull,
            json!({ "dir": path_str(local.workdir().unwrap()) }),
            Arc::new(RecordingHooks::default()),
        )
        .await
        .unwrap();
    assert_eq!(result, json!({ "oid": tip.to_string(), "fastForward": true }));
    assert!(local.workdir().unwrap().join("b.txt").exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn checkout_switches_branch() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("repo");
    let repo = init_repo(&dir, false);
    let base = commit_file(&repo, "a.txt", "one\n", "one");

    let engine = engine();
    engine
        .execute(
            Command::CreateBranch,
            json!({ "dir": path_str(&dir), "ref": "feature" }),
        )
        .await
        .unwrap();

    let hooks = Arc::new(RecordingHooks::default());
    let result = engine
        .run(
            StreamOperation::Checkout,
            json!({ "dir": path_str(&dir), "ref": "feature" }),
            hooks.clone(),
        )
        .await
        .unwrap();

    assert_eq!(result["head"], base.to_string());
    assert_eq!(
        repo.find_reference("HEAD").unwrap().symbolic_target(),
        Some("refs/heads/feature")
    );
    assert_eq!(hooks.post_checkouts.lock().unwrap()[0].new_head, base.to_string());

    let missing = engine
        .run(
            StreamOperation::Checkout,
            json!({ "dir": path_str(&dir), "ref": "nope" }),
            hooks,
        )
        .await
        .unwrap_err();
    assert_eq!(missing.status(), 404);
}

#[tokio::test(flavor = "multi_thread")]
async fn short_commands_cover_a_commit_cycle() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = path_str(&tmp.path().join("repo"));
    let engine = engine();

    engine
        .execute(Command::Init, json!({ "dir": dir, "defaultBranch": "main" }))
        .await
        .unwrap();
    assert!(engine.is_repository(&dir));

    fs::write(tmp.path().join("repo/notes.txt"), "remember\n").unwrap();
    assert_eq!(
        engine
            .execute(Command::Status, json!({ "dir": dir, "filepath": "notes.txt" }))
            .await
            .unwrap(),
        "*added"
    );

    engine
        .execute(Command::Add, json!({ "dir": dir, "filepath": "notes.txt" }))
        .await
        .unwrap();
    let oid = engine
        .execute(
            Command::Commit,
            json!({ "dir": dir, "message": "add notes", "author": author() }),
        )
        .await
        .unwrap();

    let log = engine
        .execute(Command::Log, json!({ "dir": dir, "depth": 5 }))
        .await
        .unwrap();
    assert_eq!(log[0]["oid"], oid);
    assert_eq!(log[0]["commit"]["message"], "add notes");

    assert_eq!(
        engine
            .execute(Command::CurrentBranch, json!({ "dir": dir }))
            .await
            .unwrap(),
        "main"
    );
    assert_eq!(
        engine
            .execute(Command::ReadFile, json!({ "dir": dir, "filepath": "notes.txt" }))
            .await
            .unwrap(),
        "remember\n"
    );
    assert_eq!(
        engine
            .execute(Command::ReadFile, json!({ "dir": dir, "filepath": "absent.txt" }))
            .await
            .unwrap(),
        Value::Null
    );

    engine
        .execute(Command::Tag, json!({ "dir": dir, "ref": "v1" }))
        .await
        .unwrap();
    assert_eq!(
        engine
            .execute(Command::ListTags, json!({ "dir": dir }))
            .await
            .unwrap(),
        json!(["v1"])
    );

    engine
        .execute(
            Command::SetConfig,
            json!({ "dir": dir, "path": "user.name", "value": "Config User" }),
        )
        .await
        .unwrap();
    assert_eq!(
        engine
            .execute(Command::GetConfig, json!({ "dir": dir, "path": "user.name" }))
            .await
            .unwrap(),
        "Config User"
    );

    assert_eq!(
        engine
            .execute(Command::ResolveRef, json!({ "dir": dir, "ref": "v1" }))
            .await
            .unwrap(),
        oid
    );
}

#[tokio::test]
async fn unsupported_and_invalid_requests() {
    let engine = engine();

    let err = engine
        .execute(Command::IndexPack, json!({ "dir": "/tmp" }))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Unsupported(ref name) if name == "indexPack"));
    assert_eq!(err.status(), 501);

    for (command, payload) in [
        (Command::StatusMatrix, json!({ "dir": "relative/repo" })),
        (Command::PackObjects, json!({})),
        (Command::Merge, json!({ "dir": "/definitely/not/a/repo" })),
    ] {
        let err = engine.execute(command, payload).await.unwrap_err();
        assert!(
            matches!(err, EngineError::Unsupported(ref name) if name == command.as_str()),
            "{command:?}: {err}"
        );
    }

    let err = engine.execute(Command::Log, json!({})).await.unwrap_err();
    assert!(matches!(err, EngineError::Path(PathError::InvalidUri { .. })));
    assert_eq!(err.status(), 400);

    let version = engine
        .execute(Command::Version, Value::Null)
        .await
        .unwrap();
    assert_eq!(version, engine.version());
}

#[tokio::test]
async fn mismatched_paths_fail_before_touching_disk() {
    let engine = GitEngine::new(
        GitEngineConfig::default(),
        PathResolver::for_host(Environment::Termux),
    );

    let err = engine
        .run(
            StreamOperation::Clone,
            json!({ "dir": "/home/u/repo", "url": "https://example/repo.git" }),
            Arc::new(RecordingHooks::default()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "TerminalMismatch");
    assert_eq!(err.status(), 409);
    assert!(!Path::new("/home/u/repo/.git").exists());
    assert!(!engine.is_repository("/home/u/repo"));
}
