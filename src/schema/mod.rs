//! The execution engine seam: everything the protocol core needs from a
//! concrete GraphQL schema, kept deliberately narrow (four methods) so the
//! scheduler in [`crate::server`] and the state machine in
//! [`crate::protocol::operation`] never depend on resolver internals.
//!
//! A subscription here is *pulled*, not pushed: [`ExecutableSchema::subscribe`]
//! just registers a query/variables pair under a [`SubscriptionKey`], and
//! [`ExecutableSchema::deliver`] re-executes it on demand. The server decides
//! *when* to re-deliver (coalesced, rate-limited, per
//! [`crate::protocol::notify::NotifyTriggers`]); the schema only knows how.

pub mod vss;

#[cfg(test)]
pub mod test_support;

use std::sync::Arc;

use async_graphql_parser::types::{ExecutableDocument, OperationType, Selection};
use serde_json::Value;

use crate::protocol::error::ProtocolError;
use crate::protocol::request_state::RequestState;

/// Identifies one live subscription within a schema's registry. Unique for
/// the lifetime of the process; assigned by whoever starts the subscription
/// (see [`crate::protocol::operation`]).
pub type SubscriptionKey = u64;

#[async_trait::async_trait]
pub trait ExecutableSchema: Send + Sync {
    /// Runs a query or mutation to completion and returns its `data` value.
    async fn resolve(
        &self,
        request_state: Arc<RequestState>,
        query: &str,
        operation_name: Option<&str>,
        variables: Option<Value>,
    ) -> Result<Value, ProtocolError>;

    /// Registers a subscription document under `key` without resolving it.
    /// The first delivery comes from the caller's own explicit first
    /// [`ExecutableSchema::deliver`] call, matching the original's
    /// "subscribe never delivers synchronously" rule.
    async fn subscribe(
        &self,
        key: SubscriptionKey,
        request_state: Arc<RequestState>,
        query: &str,
        operation_name: Option<&str>,
        variables: Option<Value>,
    ) -> Result<(), ProtocolError>;

    /// Drops a subscription's registration. A no-op if `key` isn't
    /// registered (mirrors the idempotent `stop` semantics at the
    /// connection layer, see P9).
    fn unsubscribe(&self, key: SubscriptionKey);

    /// Re-executes the document registered under `key` and returns its
    /// fresh `data` value.
    async fn deliver(&self, key: SubscriptionKey) -> Result<Value, ProtocolError>;
}

/// What kind of operation a parsed document contains, and — for a
/// subscription — the root field name that `notify()` triggers are grouped
/// under (§4.3 of the design notes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    Regular,
    Subscription { root_field: String },
}

/// Parses `query` and classifies it as a regular operation or a
/// subscription, extracting the root field name in the latter case.
///
/// Root field name resolution walks fragment spreads and treats inline
/// fragments as transparent, taking the *first* field name encountered in
/// document order — matching the original's subscription name visitor,
/// which resolves fragment definitions into a lookup table before walking
/// the operation's own selection set.
pub fn classify_operation(
    query: &str,
    operation_name: Option<&str>,
) -> Result<OperationKind, ProtocolError> {
    let document = async_graphql_parser::parse_query(query)
        .map_err(|e| ProtocolError::InvalidPayload(format!("invalid GraphQL document: {e}")))?;

    let operation = select_operation(&document, operation_name)?;

    if operation.ty != OperationType::Subscription {
        return Ok(OperationKind::Regular);
    }

    let root_field = first_field_name(&document, &operation.selection_set.node)
        .ok_or_else(|| ProtocolError::InvalidPayload("subscription has no root field".into()))?;

    Ok(OperationKind::Subscription { root_field })
}

fn select_operation<'a>(
    document: &'a ExecutableDocument,
    operation_name: Option<&str>,
) -> Result<&'a async_graphql_parser::types::OperationDefinition, ProtocolError> {
    use async_graphql_parser::types::DocumentOperations;

    match &document.operations {
        DocumentOperations::Single(op) => Ok(&op.node),
        DocumentOperations::Multiple(ops) => {
            let name = operation_name.ok_or_else(|| {
                ProtocolError::InvalidPayload(
                    "document defines multiple operations but no operationName was given".into(),
                )
            })?;
            ops.get(name)
                .map(|op| &op.node)
                .ok_or_else(|| ProtocolError::InvalidPayload(format!("unknown operation {name}")))
        }
    }
}

fn first_field_name(
    document: &ExecutableDocument,
    selection_set: &async_graphql_parser::types::SelectionSet,
) -> Option<String> {
    for selection in &selection_set.items {
        match &selection.node {
            Selection::Field(field) => return Some(field.node.name.node.to_string()),
            Selection::InlineFragment(frag) => {
                if let Some(name) = first_field_name(document, &frag.node.selection_set.node) {
                    return Some(name);
                }
            }
            Selection::FragmentSpread(spread) => {
                let name = &spread.node.fragment_name.node;
                if let Some(fragment) = document.fragments.get(name) {
                    if let Some(name) = first_field_name(document, &fragment.node.selection_set.node)
                    {
                        return Some(name);
                    }
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_a_query_as_regular() {
        let kind = classify_operation("{ __typename }", None).unwrap();
        assert_eq!(kind, OperationKind::Regular);
    }

    #[test]
    fn classifies_a_subscription_and_extracts_root_field() {
        let kind =
            classify_operation("subscription { vehicleSignal(path: \"x\") { value } }", None)
                .unwrap();
        assert_eq!(
            kind,
            OperationKind::Subscription {
                root_field: "vehicleSignal".into()
            }
        );
    }

    #[test]
    fn resolves_root_field_through_a_fragment_spread() {
        let query = r#"
            subscription { ...Sub }
            fragment Sub on Subscription { vehicleSignal(path: "x") { value } }
        "#;
        let kind = classify_operation(query, None).unwrap();
        assert_eq!(
            kind,
            OperationKind::Subscription {
                root_field: "vehicleSignal".into()
            }
        );
    }
}
