//! Wire-level message shapes for the `graphql-ws` legacy (Apollo
//! subscriptions-transport-ws) subprotocol: every message is a JSON object
//! `{type, id?, payload?}`.
//!
//! Client→server messages deserialize into [`ClientMessage`]; server→client
//! messages are built with [`ServerMessage`] and serialize back into that
//! same `{type, id, payload}` shape. The `id` field is carried at the
//! top level rather than nested in `payload`, which is why these aren't a
//! plain `#[serde(tag = "type")]` enum on both sides — `ServerMessage`
//! needs a little more control than derive gives us.

use serde::Deserialize;
use serde_json::Value;

/// `{query, operationName?, variables?}` — the payload of a `start` message
/// (or the body of a one-shot HTTP POST, see [`crate::protocol::connection`]).
#[derive(Debug, Clone, Deserialize)]
pub struct StartPayload {
    pub query: String,
    #[serde(rename = "operationName", default)]
    pub operation_name: Option<String>,
    #[serde(default)]
    pub variables: Option<Value>,
}

/// A message received from a client, either over the WebSocket transport or
/// synthesized for a one-shot HTTP POST (see
/// [`crate::protocol::connection::Connection::on_http`]).
#[derive(Debug, Clone)]
pub enum ClientMessage {
    ConnectionInit { payload: Option<Value> },
    Start { id: String, payload: StartPayload },
    Stop { id: String },
    ConnectionTerminate,
}

impl ClientMessage {
    /// Parses a raw `{type, id?, payload?}` object, the shape every
    /// `graphql-ws` message takes on the wire.
    pub fn parse(raw: Value) -> Result<Self, crate::protocol::error::ProtocolError> {
        use crate::protocol::error::ProtocolError;

        let obj = raw
            .as_object()
            .ok_or_else(|| ProtocolError::InvalidPayload("message is not an object".into()))?;

        let msg_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ProtocolError::InvalidPayload("missing 'type'".into()))?;

        let id = obj.get("id").and_then(Value::as_str).map(str::to_owned);
        let payload = obj.get("payload").cloned();

        match msg_type {
            "connection_init" => Ok(ClientMessage::ConnectionInit { payload }),
            "connection_terminate" => Ok(ClientMessage::ConnectionTerminate),
            "start" => {
                let id = id.ok_or_else(|| ProtocolError::InvalidPayload("missing 'id'".into()))?;
                let payload = payload
                    .ok_or_else(|| ProtocolError::InvalidPayload("missing 'payload'".into()))?;
                let payload: StartPayload = serde_json::from_value(payload).map_err(|e| {
                    ProtocolError::InvalidPayload(format!("invalid start payload: {e}"))
                })?;
                Ok(ClientMessage::Start { id, payload })
            }
            "stop" => {
                let id = id.ok_or_else(|| ProtocolError::InvalidPayload("missing 'id'".into()))?;
                Ok(ClientMessage::Stop { id })
            }
            other => Err(ProtocolError::InvalidPayload(format!(
                "Invalid message type: {other}"
            ))),
        }
    }
}

/// A message to be sent to a client. Built by [`Connection`] and
/// [`Operation`](crate::protocol::operation::Operation) and converted to wire
/// JSON by [`ServerMessage::into_json`].
///
/// [`Connection`]: crate::protocol::connection::Connection
#[derive(Debug, Clone)]
pub enum ServerMessage {
    ConnectionAck,
    ConnectionError { message: String, status_code: u16 },
    Data { id: String, payload: Value },
    Error { id: String, message: String, status_code: Option<u16> },
    Complete { id: String },
}

impl ServerMessage {
    pub fn into_json(self) -> Value {
        match self {
            ServerMessage::ConnectionAck => frame("connection_ack", None, None),
            ServerMessage::ConnectionError { message, status_code } => frame(
                "connection_error",
                None,
                Some(serde_json::json!({ "message": message, "statusCode": status_code })),
            ),
            ServerMessage::Data { id, payload } => frame("data", Some(id), Some(payload)),
            ServerMessage::Error { id, message, status_code } => {
                let mut payload = serde_json::json!({ "message": message });
                if let Some(code) = status_code {
                    payload["statusCode"] = Value::from(code);
                }
                frame("error", Some(id), Some(payload))
            }
            ServerMessage::Complete { id } => frame("complete", Some(id), None),
        }
    }

    /// The operation id this message is scoped to, if any — used by HTTP
    /// finalization (§4.5) which only cares about the one matching `id="0"`.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            ServerMessage::Data { id, .. }
            | ServerMessage::Error { id, .. }
            | ServerMessage::Complete { id } => Some(id),
            ServerMessage::ConnectionAck | ServerMessage::ConnectionError { .. } => None,
        }
    }
}

fn frame(ty: &str, id: Option<String>, payload: Option<Value>) -> Value {
    let mut obj = serde_json::Map::new();
    obj.insert("type".into(), Value::from(ty));
    if let Some(id) = id {
        obj.insert("id".into(), Value::from(id));
    }
    if let Some(payload) = payload {
        obj.insert("payload".into(), payload);
    }
    Value::Object(obj)
}
