use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::AllowAllAuthorizer;
use crate::config::AppConfig;
use crate::protocol::connection::Connection;
use crate::protocol::messages::{ClientMessage, ServerMessage, StartPayload};
use crate::schema::test_support::NullSchema;
use crate::schema::ExecutableSchema;
use crate::server::Server;

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    // Keep the scheduler fast so tests don't spend real wall-clock time
    // waiting on debounce/rate-limit windows.
    config.graphql.notify_debounce_ms = 1;
    config.graphql.min_subscription_interval_ms = 1;
    config
}

/// A `reply` sink that just records every message it's handed, for
/// assertions against what a real client would have seen on the wire.
#[derive(Clone, Default)]
struct Recorder {
    messages: Arc<Mutex<Vec<ServerMessage>>>,
}

impl Recorder {
    fn sink(&self) -> Arc<dyn Fn(ServerMessage) + Send + Sync> {
        let messages = self.messages.clone();
        Arc::new(move |msg| messages.lock().unwrap().push(msg))
    }

    fn snapshot(&self) -> Vec<ServerMessage> {
        self.messages.lock().unwrap().clone()
    }
}

fn new_connection(schema: Arc<dyn ExecutableSchema>) -> (Arc<Connection>, Recorder) {
    let config = test_config();
    let server = Server::new(&config, Arc::new(AllowAllAuthorizer::new()), schema);
    let recorder = Recorder::default();
    let conn = Connection::new(Arc::new(AllowAllAuthorizer::new()), server.handle(), recorder.sink());
    (conn, recorder)
}

/// connection_init -> start -> data/complete for a plain query, the
/// ordinary one-shot path a regular (non-subscription) operation takes.
#[tokio::test]
async fn regular_operation_completes_with_data_then_complete() {
    let (conn, recorder) = new_connection(Arc::new(NullSchema));

    conn.handle_client_message(ClientMessage::ConnectionInit { payload: None })
        .await;
    conn.handle_client_message(ClientMessage::Start {
        id: "1".into(),
        payload: StartPayload {
            query: "{ __typename }".into(),
            operation_name: None,
            variables: None,
        },
    })
    .await;

    // RegularOperation resolves on the worker pool; give it a moment.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages = recorder.snapshot();
    assert!(matches!(messages[0], ServerMessage::ConnectionAck));
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Data { id, .. } if id == "1")));
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Complete { id } if id == "1")));
}

/// P9: a `start` on an id that's already live is silently ignored, and a
/// `stop` on an id that's never been started (or already removed) is too.
#[tokio::test]
async fn duplicate_start_and_unknown_stop_are_no_ops() {
    let (conn, recorder) = new_connection(Arc::new(NullSchema));

    conn.handle_client_message(ClientMessage::ConnectionInit { payload: None })
        .await;

    let payload = StartPayload {
        query: "{ __typename }".into(),
        operation_name: None,
        variables: None,
    };
    conn.handle_client_message(ClientMessage::Start {
        id: "1".into(),
        payload: payload.clone(),
    })
    .await;
    // Same id again, before the first has a chance to finish — must not
    // spawn a second operation or reply with a second connection_ack.
    conn.handle_client_message(ClientMessage::Start { id: "1".into(), payload })
        .await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let acks = recorder
        .snapshot()
        .iter()
        .filter(|m| matches!(m, ServerMessage::ConnectionAck))
        .count();
    assert_eq!(acks, 1);

    // Stop on an id that was never started: no reply at all, no panic.
    let before = recorder.snapshot().len();
    conn.handle_client_message(ClientMessage::Stop { id: "does-not-exist".into() })
        .await;
    assert_eq!(recorder.snapshot().len(), before);
}

/// A one-shot HTTP request is just a connection with a single operation
/// under id `"0"` (§4.5).
#[tokio::test]
async fn http_one_shot_uses_operation_id_zero() {
    let (conn, recorder) = new_connection(Arc::new(NullSchema));

    conn.on_http(
        Some("Bearer irrelevant-for-allow-all"),
        StartPayload {
            query: "{ __typename }".into(),
            operation_name: None,
            variables: None,
        },
    )
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages = recorder.snapshot();
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Data { id, .. } if id == "0")));
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Complete { id } if id == "0")));
}

/// Tearing down a connection (connection_terminate) stops every live
/// operation and unregisters any subscriptions without panicking.
#[tokio::test]
async fn connection_terminate_stops_all_operations() {
    let (conn, recorder) = new_connection(Arc::new(NullSchema));

    conn.handle_client_message(ClientMessage::ConnectionInit { payload: None })
        .await;
    conn.handle_client_message(ClientMessage::Start {
        id: "1".into(),
        payload: StartPayload {
            query: "{ __typename }".into(),
            operation_name: None,
            variables: None,
        },
    })
    .await;

    conn.handle_client_message(ClientMessage::ConnectionTerminate)
        .await;

    // Starting again after terminate still works — the connection object
    // itself isn't poisoned, only its operations are cleared.
    conn.handle_client_message(ClientMessage::Start {
        id: "2".into(),
        payload: StartPayload {
            query: "{ __typename }".into(),
            operation_name: None,
            variables: None,
        },
    })
    .await;

    tokio::time::sleep(Duration::from_millis(50)).await;

    let messages = recorder.snapshot();
    assert!(messages
        .iter()
        .any(|m| matches!(m, ServerMessage::Complete { id } if id == "2")));
}
