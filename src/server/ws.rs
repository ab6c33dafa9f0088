//! The `graphql-ws` (legacy `subscriptions-transport-ws`) WebSocket
//! transport: one [`Connection`] per socket, driven by the socket's own
//! task for its whole lifetime.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::connection::Connection;
use crate::protocol::messages::{ClientMessage, ServerMessage};

use super::ServerHandle;

const SUBPROTOCOL: &str = "graphql-ws";

/// WebSocket close code for "going away" (§4.5 shutdown), used when the
/// server — not the client — is the one ending the connection.
const GOING_AWAY: u16 = 1001;

enum Outbound {
    Message(ServerMessage),
    Close,
}

pub async fn graphql_ws(ws: WebSocketUpgrade, State(server): State<ServerHandle>) -> Response {
    ws.protocols([SUBPROTOCOL]).on_upgrade(move |socket| handle_socket(socket, server))
}

async fn handle_socket(socket: WebSocket, server: ServerHandle) {
    let (mut sink, mut stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let mut shutdown_rx = server.subscribe_shutdown();

    let writer = tokio::spawn(async move {
        while let Some(outbound) = outbound_rx.recv().await {
            match outbound {
                Outbound::Message(message) => {
                    let text = message.into_json().to_string();
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: GOING_AWAY,
                            reason: "going away".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let reply_tx = outbound_tx.clone();
    let reply: Arc<dyn Fn(ServerMessage) + Send + Sync> = Arc::new(move |message| {
        let _ = reply_tx.send(Outbound::Message(message));
    });

    let connection = Connection::new(server.authorizer(), server, reply);
    let writer_abort = writer.abort_handle();

    loop {
        tokio::select! {
            message = stream.next() => {
                let Some(Ok(message)) = message else { break; };
                let raw = match message {
                    Message::Text(text) => text.to_string(),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
                };

                let parsed = serde_json::from_str::<serde_json::Value>(&raw)
                    .map_err(|e| crate::protocol::error::ProtocolError::InvalidPayload(e.to_string()))
                    .and_then(ClientMessage::parse);

                match parsed {
                    Ok(ClientMessage::ConnectionTerminate) => break,
                    Ok(message) => connection.handle_client_message(message).await,
                    Err(err) => {
                        tracing::debug!(error = %err, "dropping malformed websocket message");
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                let _ = outbound_tx.send(Outbound::Close);
                break;
            }
        }
    }

    connection.stop();
    drop(connection);
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        writer_abort.abort();
    }
}
