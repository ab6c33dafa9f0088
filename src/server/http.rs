//! One-shot HTTP POST transport (§4.5): a single operation under id `"0"`,
//! status-mapped from whatever `ServerMessage` it produces.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::Value;

use crate::protocol::connection::Connection;
use crate::protocol::messages::{ServerMessage, StartPayload};

use super::ServerHandle;

/// Handles `POST /graphql`. Builds an ephemeral [`Connection`] scoped to
/// this single request, runs the one operation it carries to completion,
/// and maps its terminal message to an HTTP response per §4.5:
/// - `Error`/`connection_error` → `payload.statusCode`, or 400 if absent
/// - `Data` with a non-null `data` field → 200
/// - `Data` with a null `data` field (every resolver failed) → 400
/// - `Complete` with no prior `Data`/`Error` → 200 with a null body
pub async fn graphql_post(
    State(server): State<ServerHandle>,
    headers: HeaderMap,
    Json(payload): Json<StartPayload>,
) -> Response {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let collected: Arc<Mutex<Option<ServerMessage>>> = Arc::new(Mutex::new(None));
    let collected_for_reply = collected.clone();
    let reply: Arc<dyn Fn(ServerMessage) + Send + Sync> = Arc::new(move |message| {
        // Connection-level messages (no operation id) always apply; anything
        // operation-scoped only matters if it's for the one operation this
        // one-shot connection ever runs, id "0" (§4.5).
        if let Some(id) = message.operation_id() {
            if id != "0" {
                return;
            }
        }
        // `Complete` carries no payload — only keep it if nothing more
        // informative has arrived yet.
        let mut slot = collected_for_reply.lock().unwrap();
        if matches!(message, ServerMessage::Complete { .. }) && slot.is_some() {
            return;
        }
        *slot = Some(message);
    });

    let connection = Connection::new(server.authorizer(), server, reply);
    connection.on_http(authorization, payload).await;

    let message = collected.lock().unwrap().take();
    match message {
        Some(ServerMessage::Error { message, status_code, .. }) => {
            let status = status_code
                .and_then(|c| StatusCode::from_u16(c).ok())
                .unwrap_or(StatusCode::BAD_REQUEST);
            (status, Json(serde_json::json!({ "errors": [{ "message": message }] }))).into_response()
        }
        Some(ServerMessage::ConnectionError { message, status_code }) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_REQUEST);
            (status, Json(serde_json::json!({ "errors": [{ "message": message }] }))).into_response()
        }
        Some(ServerMessage::Data { payload, .. }) => {
            let status = if payload.get("data").map(Value::is_null).unwrap_or(true) {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            (status, Json(payload)).into_response()
        }
        Some(ServerMessage::Complete { .. }) | None => {
            (StatusCode::OK, Json(serde_json::json!({ "data": null }))).into_response()
        }
        Some(ServerMessage::ConnectionAck) => {
            (StatusCode::OK, Json(serde_json::json!({ "data": null }))).into_response()
        }
    }
}
