//! Token-to-permissions authorization.

pub mod allow_all;
pub mod token;

pub use allow_all::AllowAllAuthorizer;
pub use token::TokenAuthorizer;

use std::sync::Arc;

use crate::permissions::PermissionSet;
use crate::protocol::error::ProtocolError;

/// Resolves a bearer token into the permission set it grants.
///
/// The original C++ interface duplicated this as two overloads (by-value
/// and by-const-ref) that behaved identically — a single `&str` method
/// covers both call shapes in Rust.
#[async_trait::async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, token: &str) -> Result<Arc<PermissionSet>, ProtocolError>;
}
