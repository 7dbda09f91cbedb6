// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only
#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use gitwire_engine::{
    CheckoutKind, Command, Engine, EngineError, Environment, GitAuth, MergeConflict,
    OperationHooks, PathResolver, PostCheckout, Progress, SignRequest, StreamOperation,
};
use gitwire_server::{AppState, Server, ServerConfig};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(10);

/// Engine that plays back the `steps` listed in the start payload.
///
/// Each step is a hook name (`"auth"`, `"authfailure"`, `"authsuccess"`,
/// `"postCheckout"`, `"sign"`, `"merge"`, `"panic"`) or an object
/// (`{"progress": {...}}`, `{"message": "..."}`, `{"sleepMs": n}`,
/// `{"fail": "..."}`). Replies to interactive hooks are returned in order
/// under `replies`.
pub struct ScriptedEngine {
    resolver: PathResolver,
    pub runs: AtomicUsize,
    pub executions: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(host: Environment) -> Self {
        Self {
            resolver: PathResolver::for_host(host),
            runs: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    async fn play(
        &self,
        step: &Value,
        url: &str,
        hooks: &dyn OperationHooks,
        replies: &mut Vec<Value>,
    ) -> Result<(), EngineError> {
        if let Some(name) = step.as_str() {
            match name {
                "auth" => replies.push(hooks.on_auth(url, &GitAuth::default()).await?),
                "authfailure" => {
                    let tried = GitAuth {
                        username: Some("first".into()),
                        ..GitAuth::default()
                    };
                    replies.push(hooks.on_auth_failure(url, &tried).await?)
                }
                "authsuccess" => hooks.on_auth_success(url, &GitAuth::default()),
                "postCheckout" => hooks.on_post_checkout(&PostCheckout {
                    previous_head: "0".repeat(40),
                    new_head: "1".repeat(40),
                    kind: CheckoutKind::Branch,
                }),
                "sign" => replies.push(
                    hooks
                        .on_sign(&SignRequest {
                            payload: "tree 4b825dc642cb6eb9a060e54bf8d69288fbee4904\n".into(),
                            secret_key: "test-key".into(),
                        })
                        .await?,
                ),
                "merge" => replies.push(
                    hooks
                        .merge_driver(&MergeConflict {
                            path: "notes.txt".into(),
                            branches: ["base".into(), "main".into(), "feature".into()],
                            contents: ["a\n".into(), "b\n".into(), "c\n".into()],
                        })
                        .await?,
                ),
                "panic" => panic!("scripted engine panic"),
                other => return Err(EngineError::invalid("steps", format!("unknown step {other}"))),
            }
        } else if let Some(ms) = step.get("sleepMs").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        } else if let Some(message) = step.get("message").and_then(Value::as_str) {
            hooks.on_message(message);
        } else if let Some(progress) = step.get("progress") {
            let progress: Progress = serde_json::from_value(progress.clone())
                .map_err(|err| EngineError::invalid("steps", err.to_string()))?;
            hooks.on_progress(&progress);
        } else if let Some(what) = step.get("fail").and_then(Value::as_str) {
            return Err(EngineError::NotFound(what.to_string()));
        } else {
            return Err(EngineError::invalid("steps", format!("unknown step {step}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for ScriptedEngine {
    async fn run(
        &self,
        operation: StreamOperation,
        payload: Value,
        hooks: Arc<dyn OperationHooks>,
    ) -> Result<Value, EngineError> {
        if payload.get("dir").is_some() {
            self.resolver.resolve_value(payload.get("dir"))?;
        }
        self.runs.fetch_add(1, Ordering::SeqCst);

        let url = payload
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("https://git.example.com/repo.git")
            .to_string();
        let steps = payload.get("steps").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut replies = Vec::new();
        for step in &steps {
            self.play(step, &url, hooks.as_ref(), &mut replies).await?;
        }
        Ok(json!({ "operation": operation.as_str(), "replies": replies }))
    }

    async fn execute(&self, command: Command, payload: Value) -> Result<Value, EngineError> {
        if payload.get("dir").is_some() {
            self.resolver.resolve_value(payload.get("dir"))?;
        }
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "command": command.as_str(), "payload": payload }))
    }

    fn is_repository(&self, dir: &str) -> bool {
        self.resolver.resolve(dir).is_ok()
    }

    fn version(&self) -> String {
        "scripted".to_string()
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl TestServer {
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, operation: &str) -> String {
        format!("ws://{}/git/{}", self.addr, operation)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn a server on an ephemeral port with optional config mutation
pub async fn spawn_server(
    engine: Arc<dyn Engine>,
    configure: impl FnOnce(&mut ServerConfig),
) -> TestServer {
    let mut config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    };
    configure(&mut config);

    let state = AppState::new(config.clone(), engine);
    let server = Server::with_state(config, state).await.expect("server");
    let addr = server.addr();
    let handle = tokio::spawn(async move {
        server.run().await.expect("server run");
    });
    TestServer { addr, handle }
}

/// Convenience: scripted engine on a host that accepts any absolute path
pub async fn spawn_scripted() -> (TestServer, Arc<ScriptedEngine>) {
    spawn_scripted_with(Environment::Unknown, |_| {}).await
}

pub async fn spawn_scripted_with(
    host: Environment,
    configure: impl FnOnce(&mut ServerConfig),
) -> (TestServer, Arc<ScriptedEngine>) {
    let engine = Arc::new(ScriptedEngine::new(host));
    let server = spawn_server(engine.clone(), configure).await;
    (server, engine)
}

pub async fn connect(url: &str) -> WsStream {
    let (socket, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
    socket
}

pub async fn send_json(socket: &mut WsStream, value: Value) {
    send_text(socket, &value.to_string()).await;
}

pub async fn send_text(socket: &mut WsStream, text: &str) {
    socket
        .send(WsMessage::Text(text.to_string()))
        .await
        .expect("send frame");
}

pub async fn send_binary(socket: &mut WsStream, bytes: Vec<u8>) {
    socket
        .send(WsMessage::Binary(bytes))
        .await
        .expect("send frame");
}

pub async fn start(socket: &mut WsStream, operation: &str, payload: Value) {
    send_json(socket, json!({ "event": format!("{operation}:start"), "payload": payload })).await;
}

/// Next JSON text frame; panics on close or timeout
pub async fn next_json(socket: &mut WsStream) -> Value {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .expect("frame");
        match frame {
            WsMessage::Text(text) => return serde_json::from_str(&text).expect("json frame"),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Skip frames until the terminal `done` event
pub async fn next_done(socket: &mut WsStream) -> Value {
    loop {
        let frame = next_json(socket).await;
        if frame["event"].as_str().is_some_and(|event| event.ends_with(":done")) {
            return frame;
        }
    }
}

/// The server closes the connection next
pub async fn expect_closed(socket: &mut WsStream) {
    loop {
        let frame = tokio::time::timeout(FRAME_TIMEOUT, socket.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            None | Some(Ok(WsMessage::Close(_))) | Some(Err(_)) => return,
            Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
        }
    }
}
