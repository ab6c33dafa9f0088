use std::path::Path;
use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::debug;

use crate::permissions::{known_permission_key, PermissionKey, PermissionSet};
use crate::protocol::error::ProtocolError;

use super::Authorizer;

const PERMISSIONS_CLAIM: &str = "permissions";
pub const DEFAULT_PUBLIC_KEY_PATH: &str = "keys/jwtRS256.key.pub";

/// Verifies a bearer token's signature and extracts its `permissions`
/// claim. An empty token is treated as valid-but-unauthenticated (not an
/// error) so introspection queries keep working without credentials.
pub struct TokenAuthorizer {
    decoding_key: DecodingKey,
    validation: Validation,
    empty_permissions: Arc<PermissionSet>,
}

impl TokenAuthorizer {
    pub fn new(decoding_key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        // The claim set here carries authorization data, not standard
        // registered claims (iss/aud/exp) — the original verifier only
        // checks the signature.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            decoding_key,
            validation,
            empty_permissions: Arc::new(PermissionSet::new()),
        }
    }

    /// Builds a verifier from a PEM-encoded RSA public key, default RS256.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, anyhow::Error> {
        let decoding_key = DecodingKey::from_rsa_pem(pem)?;
        Ok(Self::new(decoding_key, Algorithm::RS256))
    }

    /// Loads the public key from `path`, falling back to
    /// [`DEFAULT_PUBLIC_KEY_PATH`] relative to the current executable when
    /// none is given — development convenience only.
    pub fn from_path_or_default(path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let resolved = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::current_exe()?
                .parent()
                .map(|dir| dir.join(DEFAULT_PUBLIC_KEY_PATH))
                .ok_or_else(|| anyhow::anyhow!("executable has no parent directory"))?,
        };
        debug!(path = %resolved.display(), "TokenAuthorizer reading public key");
        let pem = std::fs::read(&resolved)?;
        Self::from_rsa_pem(&pem)
    }
}

#[async_trait::async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(&self, token: &str) -> Result<Arc<PermissionSet>, ProtocolError> {
        if token.is_empty() {
            debug!("TokenAuthorizer: no token to be decoded");
            return Ok(self.empty_permissions.clone());
        }

        let decoded = jsonwebtoken::decode::<Value>(token, &self.decoding_key, &self.validation)
            .map_err(|e| ProtocolError::InvalidToken(e.to_string()))?;

        let claims = decoded
            .claims
            .as_object()
            .ok_or_else(|| {
                ProtocolError::InvalidToken("Token claims are not in a valid format".into())
            })?;

        let permissions_claim = claims.get(PERMISSIONS_CLAIM).ok_or_else(|| {
            ProtocolError::InvalidToken("Token claims do not contain permissions".into())
        })?;

        let items = permissions_claim.as_array().ok_or_else(|| {
            ProtocolError::InvalidToken("Token claims permissions is not an array".into())
        })?;

        let mut permissions = PermissionSet::new();
        for item in items {
            match item {
                Value::String(name) => {
                    // Legacy path: string permission names looked up
                    // against the known-permission table. Silently
                    // ignored if unrecognized.
                    if let Some(key) = known_permission_key(name) {
                        permissions.insert(key);
                    } else {
                        debug!(permission = %name, "ignored unknown client permission");
                    }
                }
                Value::Number(n) => {
                    if let Some(key) = n.as_u64().and_then(|v| PermissionKey::try_from(v).ok()) {
                        permissions.insert(key);
                    }
                }
                _ => {}
            }
        }

        Ok(Arc::new(permissions))
    }
}
