//! Error kinds produced by the transport/execution core. Distinct from
//! [`crate::error::AppError`], which covers startup/config/IO failures:
//! these are turned into `graphql-ws`/HTTP error frames, never into a bare
//! 500.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Token error: {0}")]
    InvalidToken(String),

    #[error("Client not authenticated")]
    NotAuthenticated,

    #[error("Client doesn't have all needed permissions")]
    PermissionDenied,

    #[error("resolver failed: {0}")]
    ResolverFailure(String),

    #[error("failed to construct singleton: {0}")]
    SingletonConstruction(#[from] crate::singleton::SingletonError),
}

impl From<crate::permissions::PermissionError> for ProtocolError {
    fn from(_: crate::permissions::PermissionError) -> Self {
        ProtocolError::PermissionDenied
    }
}

impl ProtocolError {
    /// HTTP status code for a one-shot HTTP-transported operation reply,
    /// following the original's status-code-selection table: a "Token
    /// error: " prefixed message maps to 401, everything else maps to 400.
    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            ProtocolError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
