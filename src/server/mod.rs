//! The scheduler: a single notify-coalescing/GC actor shared by every
//! connection, a bounded worker pool for resolver work, and the axum
//! wiring (`/graphql` HTTP POST, `/graphql/ws` WebSocket) on top.

mod http;
mod ws;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use futures::future::BoxFuture;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::auth::Authorizer;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::protocol::connection::Connection;
use crate::protocol::notify::NotifyTriggers;
use crate::schema::{ExecutableSchema, SubscriptionKey};
use crate::singleton::SingletonStorage;

struct SubscriptionEntry {
    connection: Weak<Connection>,
    root_field: String,
    operation_id: String,
}

struct ServerShared {
    authorizer: Arc<dyn Authorizer>,
    schema: Arc<dyn ExecutableSchema>,
    singleton_storage: SingletonStorage,
    health_manager: crate::health::HealthManager,
    worker_semaphore: Arc<Semaphore>,
    worker_pool_size: usize,
    disable_permissions: bool,
    min_subscription_interval: Duration,
    notify_debounce: Duration,
    gc_grace_period: Duration,
    subscriptions: Mutex<HashMap<SubscriptionKey, SubscriptionEntry>>,
    by_name: Mutex<HashMap<String, HashSet<SubscriptionKey>>>,
    pending_notify: Mutex<HashMap<String, NotifyTriggers>>,
    armed_timers: Mutex<HashMap<String, Option<AbortHandle>>>,
    connections: Mutex<HashMap<u64, Weak<Connection>>>,
    next_connection_id: AtomicU64,
    gc_task: Mutex<Option<AbortHandle>>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
}

/// A cheap, cloneable handle to the server's shared scheduling state —
/// everything a [`Connection`]/[`crate::protocol::operation::Operation`]
/// needs without holding the server itself alive (see Design Notes's open
/// question log on `Arc<Server>` vs. a lightweight handle).
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerShared>,
}

impl ServerHandle {
    pub fn schema(&self) -> Arc<dyn ExecutableSchema> {
        self.inner.schema.clone()
    }

    pub fn authorizer(&self) -> Arc<dyn Authorizer> {
        self.inner.authorizer.clone()
    }

    pub fn health_manager(&self) -> crate::health::HealthManager {
        self.inner.health_manager.clone()
    }

    pub fn singleton_storage(&self) -> &SingletonStorage {
        &self.inner.singleton_storage
    }

    pub fn disable_permissions(&self) -> bool {
        self.inner.disable_permissions
    }

    pub fn min_subscription_interval(&self) -> Duration {
        self.inner.min_subscription_interval
    }

    /// A receiver that fires once, with `true`, when the server begins
    /// shutting down — `ws.rs` selects on this to close its socket with a
    /// going-away code instead of waiting for the client to hang up (§4.5).
    pub fn subscribe_shutdown(&self) -> tokio::sync::watch::Receiver<bool> {
        self.inner.shutdown_tx.subscribe()
    }

    /// Registers a live connection so shutdown can find and stop it. Returns
    /// the id to pass back to [`ServerHandle::deregister_connection`].
    pub fn register_connection(&self, connection: Weak<Connection>) -> u64 {
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.inner.connections.lock().unwrap().insert(id, connection);
        id
    }

    pub fn deregister_connection(&self, id: u64) {
        self.inner.connections.lock().unwrap().remove(&id);
    }

    /// The documented shutdown sequence (§4.5): stop every live connection,
    /// cancel pending notify-debounce timers and the GC loop, wait (up to
    /// `timeout`) for the worker pool to drain, then clear singleton
    /// storage, detaching anything still externally referenced.
    pub async fn shut_down(&self, timeout: Duration) {
        let _ = self.inner.shutdown_tx.send(true);

        let live: Vec<Weak<Connection>> =
            self.inner.connections.lock().unwrap().values().cloned().collect();
        for weak in live {
            if let Some(connection) = weak.upgrade() {
                connection.stop();
            }
        }

        for (_, handle) in self.inner.armed_timers.lock().unwrap().drain() {
            if let Some(handle) = handle {
                handle.abort();
            }
        }
        if let Some(handle) = self.inner.gc_task.lock().unwrap().take() {
            handle.abort();
        }

        let semaphore = self.inner.worker_semaphore.clone();
        let draining = semaphore.acquire_many_owned(self.inner.worker_pool_size as u32);
        if tokio::time::timeout(timeout, draining).await.is_err() {
            warn!("worker pool did not drain within the shutdown timeout");
        }

        self.inner.singleton_storage.clear();

        info!("graphql server stopped");
    }

    /// A closure suitable for [`crate::protocol::operation::OperationContext::offload_work`]:
    /// runs a future on the bounded worker pool, gated by a semaphore permit
    /// held for the future's whole lifetime.
    pub fn offload_work(&self) -> Arc<dyn Fn(BoxFuture<'static, ()>) -> AbortHandle + Send + Sync> {
        let semaphore = self.inner.worker_semaphore.clone();
        Arc::new(move |fut| {
            let semaphore = semaphore.clone();
            tokio::spawn(async move {
                let _permit = semaphore.acquire().await;
                fut.await;
            })
            .abort_handle()
        })
    }

    pub fn register_subscription(
        &self,
        key: SubscriptionKey,
        root_field: &str,
        connection: Weak<Connection>,
        operation_id: String,
    ) {
        self.inner.subscriptions.lock().unwrap().insert(
            key,
            SubscriptionEntry {
                connection,
                root_field: root_field.to_string(),
                operation_id,
            },
        );
        self.inner
            .by_name
            .lock()
            .unwrap()
            .entry(root_field.to_string())
            .or_default()
            .insert(key);
    }

    pub fn unregister_subscription(&self, key: SubscriptionKey) {
        if let Some(entry) = self.inner.subscriptions.lock().unwrap().remove(&key) {
            if let Some(keys) = self.inner.by_name.lock().unwrap().get_mut(&entry.root_field) {
                keys.remove(&key);
            }
        }
    }

    /// Merges `triggers` into the pending set for its root field name and
    /// arms a debounce timer for that name if one isn't already running —
    /// a burst of `notify()` calls within the debounce window collapses
    /// into exactly one delivery sweep (P7).
    pub fn notify(&self, triggers: NotifyTriggers) {
        let name = triggers.name.clone();

        {
            let mut pending = self.inner.pending_notify.lock().unwrap();
            match pending.get_mut(&name) {
                Some(existing) => existing.merge(&triggers),
                None => {
                    pending.insert(name.clone(), triggers);
                }
            }
        }

        {
            let mut armed = self.inner.armed_timers.lock().unwrap();
            if armed.contains_key(&name) {
                return;
            }
            // Reserve the slot before spawning so a second `notify()` for
            // the same name arriving before the task is spawned still sees
            // it as armed.
            armed.insert(name.clone(), None);
        }

        let this = self.clone();
        let debounce = self.inner.notify_debounce;
        let timer_name = name.clone();
        let join_handle = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            this.inner.armed_timers.lock().unwrap().remove(&timer_name);
            this.deliver_sweep(&timer_name);
        });
        self.inner
            .armed_timers
            .lock()
            .unwrap()
            .insert(name, Some(join_handle.abort_handle()));
    }

    fn deliver_sweep(&self, name: &str) {
        let triggers = self.inner.pending_notify.lock().unwrap().remove(name);
        let Some(triggers) = triggers else {
            return;
        };

        let tracked = self
            .inner
            .by_name
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .unwrap_or_default();

        let mut stale = Vec::new();
        for key in tracked.iter().filter(|key| triggers.has_subscription_key(**key)) {
            let target = self
                .inner
                .subscriptions
                .lock()
                .unwrap()
                .get(key)
                .map(|entry| (entry.connection.clone(), entry.operation_id.clone()));
            match target {
                Some((weak, operation_id)) => match weak.upgrade() {
                    Some(conn) => conn.notify_operation(&operation_id),
                    None => stale.push(*key),
                },
                None => stale.push(*key),
            }
        }

        for key in stale {
            self.unregister_subscription(key);
        }
    }

    fn spawn_gc_loop(&self) {
        let storage = self.inner.singleton_storage.clone();
        let grace = self.inner.gc_grace_period;
        let join_handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(grace).await;
                if storage.pending_garbage_collect() > 0 {
                    let collected = storage.garbage_collect();
                    if collected > 0 {
                        tracing::debug!(collected, "garbage collected disposed singletons");
                    }
                }
            }
        });
        *self.inner.gc_task.lock().unwrap() = Some(join_handle.abort_handle());
    }
}

impl axum::extract::FromRef<ServerHandle> for crate::health::HealthManager {
    fn from_ref(handle: &ServerHandle) -> Self {
        handle.health_manager()
    }
}

/// Owns the listener and axum router; `run` drives the process until a
/// shutdown signal arrives.
pub struct Server {
    handle: ServerHandle,
    bind_addr: String,
    shutdown_timeout: Duration,
}

impl Server {
    pub fn new(
        config: &AppConfig,
        authorizer: Arc<dyn Authorizer>,
        schema: Arc<dyn ExecutableSchema>,
    ) -> Self {
        let graphql = &config.graphql;
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        let handle = ServerHandle {
            inner: Arc::new(ServerShared {
                authorizer,
                schema,
                singleton_storage: SingletonStorage::new(),
                health_manager: crate::health::HealthManager::new(),
                worker_semaphore: Arc::new(Semaphore::new(graphql.worker_pool_size)),
                worker_pool_size: graphql.worker_pool_size,
                disable_permissions: graphql.disable_permissions,
                min_subscription_interval: Duration::from_millis(graphql.min_subscription_interval_ms),
                notify_debounce: Duration::from_millis(graphql.notify_debounce_ms),
                gc_grace_period: Duration::from_secs(graphql.gc_grace_period_secs),
                subscriptions: Mutex::new(HashMap::new()),
                by_name: Mutex::new(HashMap::new()),
                pending_notify: Mutex::new(HashMap::new()),
                armed_timers: Mutex::new(HashMap::new()),
                connections: Mutex::new(HashMap::new()),
                next_connection_id: AtomicU64::new(1),
                gc_task: Mutex::new(None),
                shutdown_tx,
            }),
        };

        if graphql.disable_permissions || graphql.allow_all_authorizer {
            warn!("GraphQL server running with permission checks relaxed for development");
        }

        Self {
            handle,
            bind_addr: format!("{}:{}", config.server.bind, config.server.port),
            shutdown_timeout: Duration::from_secs(config.server.shutdown_timeout),
        }
    }

    /// Test seam: a cheap clone of the scheduling handle without going
    /// through the router/`run` machinery.
    #[cfg(test)]
    pub(crate) fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/graphql", post(http::graphql_post))
            .route("/graphql/ws", get(ws::graphql_ws))
            .route("/health/liveness", get(crate::health::handlers::liveness_handler))
            .route("/health/readiness", get(crate::health::handlers::readiness_handler))
            .layer(axum::middleware::from_fn(crate::middleware::metrics_middleware))
            .layer(axum::middleware::from_fn(crate::logging::trace_requests))
            .layer(
                tower_http::cors::CorsLayer::new()
                    .allow_origin(tower_http::cors::Any)
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any),
            )
            .with_state(self.handle.clone())
    }

    pub async fn run(self) -> Result<(), AppError> {
        self.handle.spawn_gc_loop();
        self.handle.health_manager().mark_ready().await;

        let app = self.router();
        info!(bind = %self.bind_addr, "starting GraphQL server");

        let listener = TcpListener::bind(&self.bind_addr)
            .await
            .map_err(|e| AppError::Server(format!("failed to bind {}: {e}", self.bind_addr)))?;

        let shutdown_timeout = self.shutdown_timeout;
        let handle = self.handle.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(handle, shutdown_timeout))
            .await
            .map_err(|e| AppError::Server(format!("server error: {e}")))
    }
}

/// Waits for SIGINT/SIGTERM, then runs the documented shutdown sequence
/// (§4.5) before letting `axum::serve` finish stopping the listener.
async fn shutdown_signal(handle: ServerHandle, timeout: Duration) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, starting graceful shutdown"),
        _ = terminate => info!("received SIGTERM, starting graceful shutdown"),
    }

    handle.shut_down(timeout).await;
}

pub use http::graphql_post;
pub use ws::graphql_ws;
