// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Short requests: `POST /git/<command>` and `GET /git/status`

use crate::error::{RequestError, ServerError};
use crate::state::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::{OriginalUri, Path, Query, State},
    http::Method,
};
use gitwire_api_contract::DataEnvelope;
use gitwire_engine::Command;
use gitwire_logging::redact_json;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

type CommandResponse = Result<Json<DataEnvelope<Value>>, RequestError>;

/// Where a request came from, for its error envelope
struct RequestContext {
    path: String,
    method: Method,
}

impl RequestContext {
    fn fail(self, caller: Option<Command>, error: impl Into<ServerError>) -> RequestError {
        RequestError {
            path: self.path,
            method: self.method,
            caller: caller.map(Command::caller),
            error: error.into(),
        }
    }
}

/// An empty body counts as `{}`
fn parse_body(body: &[u8]) -> Result<Value, ServerError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_slice(body).map_err(|err| ServerError::BadRequest(err.to_string()))
}

async fn run_command(state: AppState, command: Command, context: RequestContext, body: Bytes) -> CommandResponse {
    let payload = match parse_body(&body) {
        Ok(payload) => payload,
        Err(err) => return Err(context.fail(Some(command), err)),
    };
    debug!(%command, payload = %redact_json(&payload), "Executing command");

    match state.engine.execute(command, payload).await {
        Ok(data) => Ok(Json(DataEnvelope::new(data))),
        Err(err) => Err(context.fail(Some(command), err)),
    }
}

/// `POST /git/<command>`
pub async fn execute(
    State(state): State<AppState>,
    Path(name): Path<String>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    body: Bytes,
) -> CommandResponse {
    let context = RequestContext {
        path: uri.to_string(),
        method,
    };
    match name.parse::<Command>() {
        Ok(command) => run_command(state, command, context, body).await,
        Err(err) => Err(context.fail(None, err)),
    }
}

/// `POST /git/status`, which shares its path with the repository check
pub async fn file_status(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    method: Method,
    body: Bytes,
) -> CommandResponse {
    let context = RequestContext {
        path: uri.to_string(),
        method,
    };
    run_command(state, Command::Status, context, body).await
}

#[derive(Debug, Deserialize)]
pub struct RepositoryQuery {
    pub dir: Option<String>,
}

/// `GET /git/status?dir=...`: whether `dir` holds a repository
pub async fn is_repository(
    State(state): State<AppState>,
    Query(query): Query<RepositoryQuery>,
) -> Json<DataEnvelope<bool>> {
    let dir = query.dir.unwrap_or_default();
    let found = state.engine.is_repository(&dir);
    debug!(dir = %dir, found, "Checked repository");
    Json(DataEnvelope::new(found))
}
