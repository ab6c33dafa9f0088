//! A concrete [`ExecutableSchema`]: a small in-memory vehicle signal store
//! exposed through `async-graphql`'s derive macros, with a pull-based
//! subscription registry layered on top (see the module docs on
//! [`crate::schema`] for why subscriptions are pulled rather than pushed).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_graphql::{Context, EmptySubscription, Object, Schema, SimpleObject};
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::permissions::READ_SIGNALS;
use crate::protocol::error::ProtocolError;
use crate::protocol::request_state::{RequestState, SignalSource};
use crate::singleton::{BuildSingleton, SingletonStorage};

use super::{ExecutableSchema, SubscriptionKey};

/// One named vehicle signal's last-known value, e.g. `Vehicle.Speed`.
#[derive(Debug, Clone, SimpleObject)]
pub struct VehicleSignalValue {
    pub path: String,
    pub value: f64,
    pub timestamp_ms: i64,
}

/// In-memory signal table, shared across every operation as a singleton.
/// Stands in for the backing telemetry bus a production deployment would
/// connect this schema to.
pub struct SignalStore {
    values: Mutex<HashMap<String, VehicleSignalValue>>,
    changed: broadcast::Sender<()>,
}

impl SignalStore {
    pub fn read(&self, path: &str) -> Option<VehicleSignalValue> {
        self.values.lock().unwrap().get(path).cloned()
    }

    pub fn write(&self, path: String, value: f64, timestamp_ms: i64) {
        self.values
            .lock()
            .unwrap()
            .insert(path.clone(), VehicleSignalValue { path, value, timestamp_ms });
        // No receivers is fine — it only means no subscription is watching.
        let _ = self.changed.send(());
    }
}

#[async_trait]
impl BuildSingleton for SignalStore {
    async fn create(_storage: &SingletonStorage) -> Result<Self, anyhow::Error> {
        let (changed, _) = broadcast::channel(16);
        Ok(SignalStore {
            values: Mutex::new(HashMap::new()),
            changed,
        })
    }
}

impl SignalSource for SignalStore {
    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.changed.subscribe()
    }
}

pub struct Query;

#[Object]
impl Query {
    /// The current value of a named signal. Also the root field a
    /// subscription on the same name re-resolves on every delivery.
    async fn vehicle_signal(
        &self,
        ctx: &Context<'_>,
        path: String,
    ) -> async_graphql::Result<VehicleSignalValue> {
        let state = ctx.data::<Arc<RequestState>>()?;
        state.validate(&[READ_SIGNALS])?;
        let store = state.get_observed_singleton::<SignalStore>().await?;
        store
            .read(&path)
            .ok_or_else(|| async_graphql::Error::new(format!("unknown signal path: {path}")))
    }
}

pub struct Mutation;

#[Object]
impl Mutation {
    /// Test/demo seam for pushing a reading into the store — production
    /// deployments would instead have the telemetry bus call
    /// `SignalStore::write` directly.
    async fn set_vehicle_signal(
        &self,
        ctx: &Context<'_>,
        path: String,
        value: f64,
        timestamp_ms: i64,
    ) -> async_graphql::Result<VehicleSignalValue> {
        let state = ctx.data::<Arc<RequestState>>()?;
        state.validate(&[crate::permissions::WRITE_SIGNALS])?;
        let store = state.get_singleton::<SignalStore>().await?;
        store.write(path.clone(), value, timestamp_ms);
        store
            .read(&path)
            .ok_or_else(|| async_graphql::Error::new("failed to read back written signal"))
    }
}

impl From<ProtocolError> for async_graphql::Error {
    fn from(err: ProtocolError) -> Self {
        let mut error = async_graphql::Error::new(err.to_string());
        error.extensions = Some({
            let mut ext = async_graphql::ErrorExtensionValues::default();
            ext.set("statusCode", err.http_status().as_u16());
            ext
        });
        error
    }
}

struct Registration {
    request_state: Arc<RequestState>,
    query: String,
    operation_name: Option<String>,
    variables: Option<Value>,
}

/// The vehicle-signal-query `ExecutableSchema`. Wraps an `async-graphql`
/// schema for actual field resolution and keeps its own registry of live
/// subscriptions for the pull model `deliver` implements.
pub struct VssSchema {
    inner: Schema<Query, Mutation, EmptySubscription>,
    registrations: Mutex<HashMap<SubscriptionKey, Registration>>,
}

impl VssSchema {
    pub fn new() -> Self {
        Self {
            inner: Schema::build(Query, Mutation, EmptySubscription).finish(),
            registrations: Mutex::new(HashMap::new()),
        }
    }

    async fn run(
        &self,
        request_state: Arc<RequestState>,
        query: &str,
        operation_name: Option<&str>,
        variables: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        let mut request = async_graphql::Request::new(query);
        if let Some(name) = operation_name {
            request = request.operation_name(name);
        }
        if let Some(vars) = variables {
            request = request.variables(async_graphql::Variables::from_json(vars));
        }
        request = request.data(request_state);

        let response = self.inner.execute(request).await;
        serde_json::to_value(response)
            .map_err(|e| ProtocolError::ResolverFailure(format!("failed to encode response: {e}")))
    }
}

impl Default for VssSchema {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutableSchema for VssSchema {
    async fn resolve(
        &self,
        request_state: Arc<RequestState>,
        query: &str,
        operation_name: Option<&str>,
        variables: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        self.run(request_state, query, operation_name, variables).await
    }

    async fn subscribe(
        &self,
        key: SubscriptionKey,
        request_state: Arc<RequestState>,
        query: &str,
        operation_name: Option<&str>,
        variables: Option<Value>,
    ) -> Result<(), ProtocolError> {
        self.registrations.lock().unwrap().insert(
            key,
            Registration {
                request_state,
                query: query.to_owned(),
                operation_name: operation_name.map(str::to_owned),
                variables,
            },
        );
        Ok(())
    }

    fn unsubscribe(&self, key: SubscriptionKey) {
        self.registrations.lock().unwrap().remove(&key);
    }

    async fn deliver(&self, key: SubscriptionKey) -> Result<Value, ProtocolError> {
        let (request_state, query, operation_name, variables) = {
            let registrations = self.registrations.lock().unwrap();
            let registration = registrations.get(&key).ok_or_else(|| {
                ProtocolError::ResolverFailure(format!("no subscription registered for {key}"))
            })?;
            (
                registration.request_state.clone(),
                registration.query.clone(),
                registration.operation_name.clone(),
                registration.variables.clone(),
            )
        };
        self.run(request_state, &query, operation_name.as_deref(), variables)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::PermissionSet;

    fn request_state(subscription: bool) -> Arc<RequestState> {
        let permissions: PermissionSet = [READ_SIGNALS, crate::permissions::WRITE_SIGNALS]
            .into_iter()
            .collect();
        Arc::new(RequestState::new(
            Arc::new(VssSchema::new()),
            Some(Arc::new(permissions)),
            SingletonStorage::new(),
            subscription,
            false,
            None,
            None,
        ))
    }

    #[tokio::test]
    async fn resolves_a_signal_after_it_is_written() {
        let schema = VssSchema::new();
        let state = request_state(false);

        schema
            .run(
                state.clone(),
                r#"mutation { setVehicleSignal(path: "Vehicle.Speed", value: 42.0, timestampMs: 1) { value } }"#,
                None,
                None,
            )
            .await
            .unwrap();

        let response = schema
            .run(
                state,
                r#"{ vehicleSignal(path: "Vehicle.Speed") { value } }"#,
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(response["data"]["vehicleSignal"]["value"], 42.0);
    }

    #[tokio::test]
    async fn unknown_path_surfaces_as_a_graphql_error_not_a_protocol_error() {
        let schema = VssSchema::new();
        let state = request_state(false);
        let response = schema
            .run(state, r#"{ vehicleSignal(path: "nope") { value } }"#, None, None)
            .await
            .unwrap();
        assert!(response["data"]["vehicleSignal"].is_null());
        assert!(!response["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_then_deliver_re_resolves_with_current_data() {
        let schema = VssSchema::new();
        let state = request_state(true);

        schema
            .run(
                state.clone(),
                r#"mutation { setVehicleSignal(path: "Vehicle.Speed", value: 10.0, timestampMs: 1) { value } }"#,
                None,
                None,
            )
            .await
            .unwrap();

        schema
            .subscribe(
                1,
                state.clone(),
                r#"{ vehicleSignal(path: "Vehicle.Speed") { value } }"#,
                None,
                None,
            )
            .await
            .unwrap();

        let first = schema.deliver(1).await.unwrap();
        assert_eq!(first["data"]["vehicleSignal"]["value"], 10.0);

        schema
            .run(
                state,
                r#"mutation { setVehicleSignal(path: "Vehicle.Speed", value: 20.0, timestampMs: 2) { value } }"#,
                None,
                None,
            )
            .await
            .unwrap();

        let second = schema.deliver(1).await.unwrap();
        assert_eq!(second["data"]["vehicleSignal"]["value"], 20.0);

        schema.unsubscribe(1);
        assert!(schema.deliver(1).await.is_err());
    }
}
