//! Crate-level error types.

use crate::types::DbId;

/// General domain errors shared across the workspace.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors produced by the signing service and command builder.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// No operator key material is available to sign with.
    #[error("No operator signing key configured: {0}")]
    MissingKey(String),

    /// A signature or token failed cryptographic verification.
    #[error("Invalid signature")]
    InvalidSignature,

    /// A route pass was structurally valid but past its `exp` claim.
    #[error("Token expired")]
    Expired,

    /// The payload could not be serialized or the token could not be encoded.
    #[error("Failed to encode signing input: {0}")]
    Encoding(String),
}

impl From<serde_json::Error> for SigningError {
    fn from(e: serde_json::Error) -> Self {
        SigningError::Encoding(e.to_string())
    }
}
