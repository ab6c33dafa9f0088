//! Minimal [`ExecutableSchema`] stand-in for tests that need *a* schema but
//! don't exercise resolution.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::error::ProtocolError;
use crate::protocol::request_state::RequestState;

use super::{ExecutableSchema, SubscriptionKey};

pub struct NullSchema;

#[async_trait]
impl ExecutableSchema for NullSchema {
    async fn resolve(
        &self,
        _request_state: Arc<RequestState>,
        _query: &str,
        _operation_name: Option<&str>,
        _variables: Option<Value>,
    ) -> Result<Value, ProtocolError> {
        Ok(Value::Null)
    }

    async fn subscribe(
        &self,
        _key: SubscriptionKey,
        _request_state: Arc<RequestState>,
        _query: &str,
        _operation_name: Option<&str>,
        _variables: Option<Value>,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }

    fn unsubscribe(&self, _key: SubscriptionKey) {}

    async fn deliver(&self, _key: SubscriptionKey) -> Result<Value, ProtocolError> {
        Ok(Value::Null)
    }
}
