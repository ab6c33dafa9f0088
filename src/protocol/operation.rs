//! One in-flight GraphQL operation: a one-shot `Regular` resolution, or a
//! long-lived `Subscription` redelivered on every relevant `notify()`.
//!
//! Deliberately a tagged enum rather than the virtual `RequestState`
//! subclass hierarchy the two kinds share in the C++ original — Rust has no
//! use for the indirection once the two variants' behavior is this
//! different (see the design notes' open-question log).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::protocol::error::ProtocolError;
use crate::protocol::messages::ServerMessage;
use crate::protocol::request_state::RequestState;
use crate::schema::{ExecutableSchema, SubscriptionKey};

/// Everything an `Operation` needs from its owning connection/server to run,
/// bundled the way the original's `GraphQLRequestHandlers` bundles its
/// `std::function` members — see [`crate::server::ConnectionHandlers`].
#[derive(Clone)]
pub struct OperationContext {
    pub schema: Arc<dyn ExecutableSchema>,
    /// Runs a future on the bounded worker pool, returning a handle that
    /// cancels it if dropped work is still pending.
    pub offload_work: Arc<dyn Fn(BoxFuture<'static, ()>) -> AbortHandle + Send + Sync>,
    pub reply: Arc<dyn Fn(ServerMessage) + Send + Sync>,
    /// Floor on the gap between two deliveries of the same subscription —
    /// rate limiting, not the debounce that coalesces `notify()` bursts
    /// before they reach an operation at all (that lives in the server's
    /// notify-coalescing map, see [`crate::protocol::notify`]).
    pub min_subscription_interval: Duration,
}

/// A one-shot query or mutation.
pub struct RegularOperation {
    id: String,
    handle: Mutex<Option<AbortHandle>>,
    stopped: AtomicBool,
}

impl RegularOperation {
    pub fn start(
        ctx: OperationContext,
        id: String,
        request_state: Arc<RequestState>,
        query: String,
        operation_name: Option<String>,
        variables: Option<Value>,
    ) -> Arc<Self> {
        let op = Arc::new(Self {
            id: id.clone(),
            handle: Mutex::new(None),
            stopped: AtomicBool::new(false),
        });

        let offload_work = ctx.offload_work.clone();
        let schema = ctx.schema.clone();
        let reply = ctx.reply.clone();
        let reply_id = id.clone();
        let work: BoxFuture<'static, ()> = Box::pin(async move {
            let result = schema
                .resolve(request_state, &query, operation_name.as_deref(), variables)
                .await;
            match result {
                Ok(payload) => reply(ServerMessage::Data { id: reply_id.clone(), payload }),
                Err(err) => reply(ServerMessage::Error {
                    id: reply_id.clone(),
                    message: err.to_string(),
                    status_code: Some(err.http_status().as_u16()),
                }),
            }
            reply(ServerMessage::Complete { id: reply_id });
        });

        *op.handle.lock().unwrap() = Some(offload_work(work));
        op
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Idempotent: a second `stop()` after the operation already finished or
    /// was already stopped is a no-op (P9).
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// A subscription: registered once with the schema, then redelivered every
/// time [`SubscriptionOperation::notify`] fires, subject to a minimum
/// interval between deliveries and single-flight coalescing (P6/P7).
pub struct SubscriptionOperation {
    id: String,
    key: SubscriptionKey,
    root_field: String,
    notify_tx: tokio::sync::mpsc::UnboundedSender<()>,
    task: Mutex<Option<AbortHandle>>,
    stopped: AtomicBool,
    interval: Arc<Mutex<Duration>>,
}

impl SubscriptionOperation {
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        ctx: OperationContext,
        id: String,
        key: SubscriptionKey,
        root_field: String,
        request_state: Arc<RequestState>,
        on_permission_failure: Arc<dyn Fn() + Send + Sync>,
    ) -> Arc<Self> {
        let (notify_tx, mut notify_rx) = tokio::sync::mpsc::unbounded_channel::<()>();

        let interval = Arc::new(Mutex::new(ctx.min_subscription_interval));

        let op = Arc::new(Self {
            id: id.clone(),
            key,
            root_field,
            notify_tx,
            task: Mutex::new(None),
            stopped: AtomicBool::new(false),
            interval: interval.clone(),
        });

        let task_id = id.clone();
        let schema = ctx.schema.clone();
        let reply = ctx.reply.clone();

        let join_handle = tokio::spawn(async move {
            let mut last_delivery: Option<Instant> = None;
            while notify_rx.recv().await.is_some() {
                // Coalesce a burst of notifications that arrived while this
                // task wasn't waiting — one delivery covers all of them.
                while notify_rx.try_recv().is_ok() {}

                let min_interval = *interval.lock().unwrap();
                if let Some(last) = last_delivery {
                    let elapsed = last.elapsed();
                    if elapsed < min_interval {
                        tokio::time::sleep(min_interval - elapsed).await;
                        while notify_rx.try_recv().is_ok() {}
                    }
                }
                last_delivery = Some(Instant::now());

                if request_state.failed_permissions_check() {
                    on_permission_failure();
                    break;
                }

                match schema.deliver(key).await {
                    Ok(payload) => {
                        request_state.mark_permissions_checked();
                        reply(ServerMessage::Data { id: task_id.clone(), payload });
                    }
                    Err(err) => {
                        let is_auth_failure = matches!(
                            err,
                            ProtocolError::NotAuthenticated | ProtocolError::PermissionDenied
                        );
                        reply(ServerMessage::Error {
                            id: task_id.clone(),
                            message: err.to_string(),
                            status_code: Some(err.http_status().as_u16()),
                        });
                        if is_auth_failure {
                            on_permission_failure();
                            break;
                        }
                    }
                }
            }
        });

        *op.task.lock().unwrap() = Some(join_handle.abort_handle());
        op
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn key(&self) -> SubscriptionKey {
        self.key
    }

    pub fn root_field(&self) -> &str {
        &self.root_field
    }

    /// Wakes the delivery loop. Safe to call from any task, including the
    /// server's notify-coalescing sweep or a `RequestState::observe` signal
    /// handler running on its own spawned task.
    pub fn notify(&self) {
        let _ = self.notify_tx.send(());
    }

    /// Overrides the delivery rate floor for this one subscription,
    /// effective from the next wake of its delivery loop onward (§4.3.2
    /// step 1).
    pub fn set_interval(&self, interval: Duration) {
        *self.interval.lock().unwrap() = interval;
    }

    /// Idempotent (P9): stopping an already-stopped subscription, e.g. a
    /// duplicate `stop` message or a permission-failure-triggered stop
    /// racing a client-initiated one, is a no-op.
    pub fn stop(&self, schema: &dyn ExecutableSchema) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        schema.unsubscribe(self.key);
    }
}

/// A live operation, one-shot or long-lived.
pub enum Operation {
    Regular(Arc<RegularOperation>),
    Subscription(Arc<SubscriptionOperation>),
}

impl Operation {
    pub fn id(&self) -> &str {
        match self {
            Operation::Regular(op) => op.id(),
            Operation::Subscription(op) => op.id(),
        }
    }

    pub fn stop(&self, schema: &dyn ExecutableSchema) {
        match self {
            Operation::Regular(op) => op.stop(),
            Operation::Subscription(op) => op.stop(schema),
        }
    }

    pub fn as_subscription(&self) -> Option<&Arc<SubscriptionOperation>> {
        match self {
            Operation::Subscription(op) => Some(op),
            Operation::Regular(_) => None,
        }
    }
}
