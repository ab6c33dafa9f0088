//! Per-operation context handed to resolvers: permission checks, singleton
//! acquisition (deduplicated per operation), and — for subscriptions — the
//! plumbing that lets a resolver observe a backend signal and trigger a
//! fresh delivery when it changes.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::AbortHandle;

use crate::permissions::PermissionSet;
use crate::protocol::error::ProtocolError;
use crate::schema::ExecutableSchema;
use crate::singleton::{BuildSingleton, SingletonRef, SingletonStorage};

/// A channel a singleton can expose so subscriptions sitting on top of it
/// learn when to re-deliver. The Rust analogue of a `boost::signals2::signal`
/// member on a singleton value — see Design Notes §9 ("Signal observers").
pub trait SignalSource {
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()>;
}

/// Per-operation state handed to resolvers.
///
/// One `RequestState` is constructed per [`Operation`](crate::protocol::operation::Operation)
/// and shared (via `Arc`) with every resolver invocation it drives — a
/// regular operation resolves once, a subscription re-resolves on every
/// delivery, reusing the same `RequestState` (and so the same singleton
/// dedup cache) across deliveries.
pub struct RequestState {
    schema: Arc<dyn ExecutableSchema>,
    permissions: Option<Arc<PermissionSet>>,
    singleton_storage: SingletonStorage,
    is_subscription: bool,
    /// Set once at construction (mirrors `DISABLE_PERMISSIONS`); otherwise
    /// flipped permanently to `true` by a subscription after its first
    /// non-failed delivery (see [`RequestState::mark_permissions_checked`]).
    did_permissions_check: AtomicBool,
    failed_permissions_check: AtomicBool,
    used_singletons: Mutex<HashMap<&'static str, Box<dyn Any + Send + Sync>>>,
    /// Only populated for subscriptions: called by `observe` when a
    /// watched signal fires, routing back into the owning Operation's own
    /// `notify()` (§4.3.2).
    notify_callback: Option<Arc<dyn Fn() + Send + Sync>>,
    /// Only populated for subscriptions: routes `set_interval` to the
    /// owning `SubscriptionOperation` (§4.3.2 step 1).
    interval_callback: Option<Arc<dyn Fn(Duration) + Send + Sync>>,
    observer_tasks: Mutex<Vec<AbortHandle>>,
}

impl RequestState {
    pub fn new(
        schema: Arc<dyn ExecutableSchema>,
        permissions: Option<Arc<PermissionSet>>,
        singleton_storage: SingletonStorage,
        is_subscription: bool,
        disable_permissions: bool,
        notify_callback: Option<Arc<dyn Fn() + Send + Sync>>,
        interval_callback: Option<Arc<dyn Fn(Duration) + Send + Sync>>,
    ) -> Self {
        Self {
            schema,
            permissions,
            singleton_storage,
            is_subscription,
            did_permissions_check: AtomicBool::new(disable_permissions),
            failed_permissions_check: AtomicBool::new(false),
            used_singletons: Mutex::new(HashMap::new()),
            notify_callback,
            interval_callback,
            observer_tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn schema(&self) -> &Arc<dyn ExecutableSchema> {
        &self.schema
    }

    pub fn is_subscription(&self) -> bool {
        self.is_subscription
    }

    pub fn failed_permissions_check(&self) -> bool {
        self.failed_permissions_check.load(Ordering::Acquire)
    }

    /// Called by a subscription's `Operation` after a delivery completes
    /// without a permission failure, so subsequent re-deliveries skip
    /// re-validating a permission set that can't change mid-connection.
    pub fn mark_permissions_checked(&self) {
        if !self.failed_permissions_check.load(Ordering::Acquire) {
            self.did_permissions_check.store(true, Ordering::Release);
        }
    }

    /// Fails with [`ProtocolError::NotAuthenticated`] if no permission set is
    /// attached at all (credentials required but missing), or
    /// [`ProtocolError::PermissionDenied`] if the attached set is missing one
    /// of `required`. A no-op once [`RequestState::mark_permissions_checked`]
    /// has run, or if permission checks were disabled at construction.
    pub fn validate(&self, required: &[crate::permissions::PermissionKey]) -> Result<(), ProtocolError> {
        if self.did_permissions_check.load(Ordering::Acquire) {
            return Ok(());
        }

        match &self.permissions {
            None => {
                self.failed_permissions_check.store(true, Ordering::Release);
                Err(ProtocolError::NotAuthenticated)
            }
            Some(permissions) => match permissions.validate(required) {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.failed_permissions_check.store(true, Ordering::Release);
                    Err(e.into())
                }
            },
        }
    }

    /// Looks up or acquires the singleton of type `T`, deduplicating
    /// repeated lookups within the same operation so a resolver touching
    /// the same backend resource twice doesn't churn its refcount.
    pub async fn get_singleton<T: BuildSingleton>(&self) -> Result<Arc<T>, ProtocolError> {
        let key = std::any::type_name::<T>();

        if let Some(existing) = self.used_singletons.lock().unwrap().get(key) {
            let existing_ref = existing
                .downcast_ref::<SingletonRef<T>>()
                .expect("singleton key collided with a different type");
            return Ok(existing_ref.value().clone());
        }

        let singleton_ref = self.singleton_storage.acquire::<T>().await?;
        let value = singleton_ref.value().clone();
        self.used_singletons
            .lock()
            .unwrap()
            .insert(key, Box::new(singleton_ref));
        Ok(value)
    }

    /// Like [`RequestState::get_singleton`], but additionally arranges for
    /// the operation to be notified (re-delivered, if it's a subscription)
    /// whenever `source` fires its change signal. A no-op subscription for
    /// regular (non-subscription) operations, matching the original's
    /// `if (!m_isSubscription) return;` guard in `observe`.
    pub async fn get_observed_singleton<T>(&self) -> Result<Arc<T>, ProtocolError>
    where
        T: BuildSingleton + SignalSource,
    {
        let value = self.get_singleton::<T>().await?;
        self.observe(value.as_ref());
        Ok(value)
    }

    /// Overrides the delivery rate floor for this one subscription (§4.3.2
    /// step 1), in place of the server-wide default it started with. A
    /// no-op for regular (non-subscription) operations.
    pub fn set_interval(&self, interval: Duration) {
        if !self.is_subscription {
            return;
        }
        if let Some(callback) = &self.interval_callback {
            callback(interval);
        }
    }

    fn observe<T: SignalSource>(&self, source: &T) {
        let Some(notify) = self.notify_callback.clone() else {
            return;
        };
        if !self.is_subscription {
            return;
        }
        let mut receiver = source.subscribe();
        let handle = tokio::spawn(async move {
            while receiver.recv().await.is_ok() {
                notify();
            }
        })
        .abort_handle();
        self.observer_tasks.lock().unwrap().push(handle);
    }
}

impl Drop for RequestState {
    /// The Rust analogue of the original's `boost::signals2::scoped_connection`
    /// deque: every observer task this request registered is torn down when
    /// the request (and thus the operation owning it) goes away.
    fn drop(&mut self) {
        for handle in self.observer_tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}
