use std::sync::Arc;

use tracing::warn;

use crate::permissions::{all_known_keys, PermissionSet};
use crate::protocol::error::ProtocolError;

use super::Authorizer;

/// Grants every known permission to every token, ignoring it entirely.
/// Dev-only: building one every time would be wasteful *and* would defeat
/// its only useful property (pointer/`Arc` identity so callers can cheaply
/// tell "same permissions" apart) — so the set is built once at
/// construction and shared for the authorizer's whole lifetime.
pub struct AllowAllAuthorizer {
    permissions: Arc<PermissionSet>,
}

impl AllowAllAuthorizer {
    pub fn new() -> Self {
        warn!("AllowAllAuthorizer created: will allow everything, do not use in production");
        Self {
            permissions: Arc::new(all_known_keys().collect()),
        }
    }
}

impl Default for AllowAllAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn authorize(&self, _token: &str) -> Result<Arc<PermissionSet>, ProtocolError> {
        Ok(self.permissions.clone())
    }
}
