//! One client connection (a WebSocket, or a single HTTP request treated as
//! a connection with exactly one operation). Owns the live operations for
//! that connection and the permission set established by its
//! `connection_init`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use serde_json::Value;

use crate::auth::Authorizer;
use crate::permissions::PermissionSet;
use crate::protocol::error::ProtocolError;
use crate::protocol::messages::{ClientMessage, ServerMessage, StartPayload};
use crate::protocol::operation::{Operation, OperationContext, RegularOperation, SubscriptionOperation};
use crate::protocol::request_state::RequestState;
use crate::schema::{classify_operation, ExecutableSchema, OperationKind};
use crate::server::ServerHandle;

/// Extracts a bearer token from a `connection_init` payload's
/// `{"authorization": "Bearer <token>"}` shape, or the HTTP
/// `Authorization` header for a one-shot request. An absent or malformed
/// header yields an empty token — [`crate::auth::Authorizer`] treats that
/// as valid-but-unauthenticated, not an error.
pub fn extract_bearer_token(raw: Option<&str>) -> &str {
    match raw {
        Some(value) => value.strip_prefix("Bearer ").unwrap_or(value),
        None => "",
    }
}

fn token_from_payload(payload: &Option<Value>) -> &str {
    let raw = payload
        .as_ref()
        .and_then(|p| p.get("authorization"))
        .and_then(Value::as_str);
    extract_bearer_token(raw)
}

pub struct Connection {
    id: Mutex<Option<u64>>,
    authorizer: Arc<dyn Authorizer>,
    server: ServerHandle,
    reply: Arc<dyn Fn(ServerMessage) + Send + Sync>,
    permissions: Mutex<Option<Arc<PermissionSet>>>,
    operations: Mutex<HashMap<String, Operation>>,
    next_subscription_key: AtomicU64,
}

impl Connection {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        server: ServerHandle,
        reply: Arc<dyn Fn(ServerMessage) + Send + Sync>,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            id: Mutex::new(None),
            authorizer,
            server,
            reply,
            permissions: Mutex::new(None),
            operations: Mutex::new(HashMap::new()),
            next_subscription_key: AtomicU64::new(1),
        });
        let id = connection.server.register_connection(Arc::downgrade(&connection));
        *connection.id.lock().unwrap() = Some(id);
        connection
    }

    /// The whole `graphql-ws` message dispatch table (§4.2). Each arm is a
    /// no-op when it doesn't apply — connection_init arriving twice just
    /// re-authorizes, `stop` on an unknown id is silently ignored (P9), and
    /// so on.
    pub async fn handle_client_message(self: &Arc<Self>, message: ClientMessage) {
        match message {
            ClientMessage::ConnectionInit { payload } => self.on_connection_init(payload).await,
            ClientMessage::Start { id, payload } => self.on_start(id, payload).await,
            ClientMessage::Stop { id } => self.on_stop(&id),
            ClientMessage::ConnectionTerminate => self.tear_down(),
        }
    }

    /// Handles a one-shot HTTP POST as a connection with exactly one
    /// operation under id `"0"` (§4.5): authorizes from the `Authorization`
    /// header, starts the operation, and returns once the operation
    /// completes (or fails outright).
    pub async fn on_http(
        self: &Arc<Self>,
        authorization_header: Option<&str>,
        payload: StartPayload,
    ) {
        self.authorize(extract_bearer_token(authorization_header)).await;
        self.on_start("0".to_string(), payload).await;
    }

    async fn on_connection_init(self: &Arc<Self>, payload: Option<Value>) {
        let token = token_from_payload(&payload).to_string();
        self.authorize(&token).await;
    }

    async fn authorize(self: &Arc<Self>, token: &str) {
        match self.authorizer.authorize(token).await {
            Ok(permissions) => {
                *self.permissions.lock().unwrap() = Some(permissions);
                (self.reply)(ServerMessage::ConnectionAck);
            }
            Err(err) => {
                (self.reply)(ServerMessage::ConnectionError {
                    message: err.to_string(),
                    status_code: err.http_status().as_u16(),
                });
            }
        }
    }

    async fn on_start(self: &Arc<Self>, id: String, payload: StartPayload) {
        // Duplicate start on a still-live id is a no-op (P9) rather than an
        // error — the client may have raced a retry against a slow server.
        if self.operations.lock().unwrap().contains_key(&id) {
            return;
        }

        let kind = match classify_operation(&payload.query, payload.operation_name.as_deref()) {
            Ok(kind) => kind,
            Err(err) => {
                (self.reply)(ServerMessage::Error {
                    id: id.clone(),
                    message: err.to_string(),
                    status_code: Some(err.http_status().as_u16()),
                });
                (self.reply)(ServerMessage::Complete { id });
                return;
            }
        };

        let permissions = self.permissions.lock().unwrap().clone();
        let is_subscription = matches!(kind, OperationKind::Subscription { .. });

        let weak_self = Arc::downgrade(self);
        let notify_id = id.clone();
        let notify_callback: Option<Arc<dyn Fn() + Send + Sync>> = is_subscription.then(|| {
            Arc::new(move || {
                if let Some(conn) = weak_self.upgrade() {
                    conn.notify_operation(&notify_id);
                }
            }) as Arc<dyn Fn() + Send + Sync>
        });

        let weak_self = Arc::downgrade(self);
        let interval_id = id.clone();
        let interval_callback: Option<Arc<dyn Fn(Duration) + Send + Sync>> = is_subscription.then(|| {
            Arc::new(move |interval| {
                if let Some(conn) = weak_self.upgrade() {
                    conn.set_subscription_interval(&interval_id, interval);
                }
            }) as Arc<dyn Fn(Duration) + Send + Sync>
        });

        let request_state = Arc::new(RequestState::new(
            self.server.schema(),
            permissions,
            self.server.singleton_storage().clone(),
            is_subscription,
            self.server.disable_permissions(),
            notify_callback,
            interval_callback,
        ));

        let reply = self.reply.clone();
        let ctx = OperationContext {
            schema: self.server.schema(),
            offload_work: self.server.offload_work(),
            reply: reply.clone(),
            min_subscription_interval: self.server.min_subscription_interval(),
        };

        match kind {
            OperationKind::Regular => {
                let op = RegularOperation::start(
                    ctx,
                    id.clone(),
                    request_state,
                    payload.query,
                    payload.operation_name,
                    payload.variables,
                );
                self.operations
                    .lock()
                    .unwrap()
                    .insert(id, Operation::Regular(op));
            }
            OperationKind::Subscription { root_field } => {
                let key = self.next_subscription_key.fetch_add(1, Ordering::Relaxed);

                if let Err(err) = self
                    .server
                    .schema()
                    .subscribe(
                        key,
                        request_state.clone(),
                        &payload.query,
                        payload.operation_name.as_deref(),
                        payload.variables,
                    )
                    .await
                {
                    (self.reply)(ServerMessage::Error {
                        id: id.clone(),
                        message: err.to_string(),
                        status_code: Some(err.http_status().as_u16()),
                    });
                    (self.reply)(ServerMessage::Complete { id });
                    return;
                }

                let weak_self = Arc::downgrade(self);
                let stop_id = id.clone();
                let on_permission_failure: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                    if let Some(conn) = weak_self.upgrade() {
                        conn.on_stop(&stop_id);
                    }
                });

                let op = SubscriptionOperation::start(
                    ctx,
                    id.clone(),
                    key,
                    root_field.clone(),
                    request_state,
                    on_permission_failure,
                );

                self.server
                    .register_subscription(key, &root_field, Arc::downgrade(self), id.clone());

                // A subscription sees current state right away rather than
                // waiting for the first backend change after it starts.
                op.notify();

                self.operations
                    .lock()
                    .unwrap()
                    .insert(id, Operation::Subscription(op));
            }
        }
    }

    fn on_stop(self: &Arc<Self>, id: &str) {
        let removed = self.operations.lock().unwrap().remove(id);
        let Some(op) = removed else {
            // Unknown id: already completed, already stopped, or never
            // existed. All three are a no-op (P9).
            return;
        };
        if let Some(sub) = op.as_subscription() {
            self.server.unregister_subscription(sub.key());
        }
        op.stop(self.server.schema().as_ref());
        (self.reply)(ServerMessage::Complete { id: id.to_string() });
    }

    /// Called by [`ServerHandle`]'s delivery sweep (or a resolver's own
    /// `observe`d signal) to wake one subscription's delivery loop.
    pub fn notify_operation(&self, id: &str) {
        if let Some(Operation::Subscription(op)) = self.operations.lock().unwrap().get(id) {
            op.notify();
        }
    }

    /// Called by a resolver's `RequestState::set_interval` to override one
    /// subscription's delivery rate floor (§4.3.2 step 1).
    pub fn set_subscription_interval(&self, id: &str, interval: Duration) {
        if let Some(Operation::Subscription(op)) = self.operations.lock().unwrap().get(id) {
            op.set_interval(interval);
        }
    }

    pub fn stop(self: &Arc<Self>) {
        self.tear_down();
    }

    fn tear_down(self: &Arc<Self>) {
        let operations = std::mem::take(&mut *self.operations.lock().unwrap());
        for (_, op) in operations {
            if let Some(sub) = op.as_subscription() {
                self.server.unregister_subscription(sub.key());
            }
            op.stop(self.server.schema().as_ref());
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        let operations = std::mem::take(&mut *self.operations.lock().unwrap());
        for (_, op) in operations {
            if let Some(sub) = op.as_subscription() {
                self.server.unregister_subscription(sub.key());
            }
            op.stop(self.server.schema().as_ref());
        }
        if let Some(id) = self.id.lock().unwrap().take() {
            self.server.deregister_connection(id);
        }
    }
}

#[allow(dead_code)]
fn assert_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn _static_assertions() {
    assert_sync::<Connection>();
}
