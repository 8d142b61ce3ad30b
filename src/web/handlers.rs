use super::AppState;
use super::error::{Result, WebError};
use crate::fanout::{ActorPath, SINGLETON_ACTOR};
use crate::protocol::{Operation, encode_envelope};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

fn json_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "application/json; charset=utf-8")], body).into_response()
}

fn pretty_json<T: Serialize>(value: &T) -> Result<Response> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| WebError::Internal(format!("failed to encode response: {}", e)))?;
    Ok(json_response(body))
}

/// `POST /actors/{name}`: the actor's own entry point. Always 200 once the
/// actor is reachable; failures travel inside the envelope.
pub async fn actor_request(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let envelope = state.host.call(&name, body.to_vec()).await?;
    Ok(json_response(encode_envelope(&envelope)?))
}

/// `POST /actors/{name}/hang`
pub async fn actor_hang(State(state): State<AppState>, Path(name): Path<String>) -> Result<String> {
    Ok(state.host.hang(&name).await?)
}

/// `/{operation}`: simple mode against the singleton actor.
pub async fn single(State(state): State<AppState>, Path(operation): Path<String>) -> Result<Response> {
    let operation: Operation = operation.parse()?;
    if operation == Operation::Hang {
        let reply = state
            .fanout
            .directory()
            .fetch(SINGLETON_ACTOR, ActorPath::Hang, String::new())
            .await?;
        return Ok(reply.into_response());
    }
    let envelope = state.fanout.call_one(SINGLETON_ACTOR, operation).await;
    Ok(json_response(encode_envelope(&envelope)?))
}

/// `/{operation}/{n}`: fan-out over `n` actors.
pub async fn fan_out(
    State(state): State<AppState>,
    Path((operation, n)): Path<(String, String)>,
) -> Result<Response> {
    let operation: Operation = operation.parse()?;
    let n: usize = n.parse().map_err(|_| WebError::NotFound)?;
    let report = state.fanout.run(operation, n).await?;
    pretty_json(&report)
}

pub async fn not_found() -> WebError {
    WebError::NotFound
}
