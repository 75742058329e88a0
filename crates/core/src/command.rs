//! Signed command packet types and the builder that produces them.
//!
//! A command packet is the only artifact the platform pushes to gateways.
//! The payload is never mutated after signing; the signature is detached
//! and computed over the canonical serialization of the payload.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SigningError;
use crate::signing::SigningService;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Command discriminator carried in `payload.cmd_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    #[serde(rename = "DENYLIST_ADD")]
    DenylistAdd,
    #[serde(rename = "DENYLIST_REMOVE")]
    DenylistRemove,
}

impl CommandType {
    /// Wire string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DenylistAdd => "DENYLIST_ADD",
            Self::DenylistRemove => "DENYLIST_REMOVE",
        }
    }
}

/// A denied (or un-denied) subject inside a command payload.
///
/// `exp` is a UTC Unix timestamp; `0` means "no expiry" and is the
/// conventional value on removals, where the receiver ignores it anyway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenylistSubject {
    pub sub: String,
    pub exp: i64,
}

/// Device targeting block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandTargets {
    pub device_ids: Vec<String>,
}

/// The signed portion of a command packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPayload {
    pub cmd_type: CommandType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denylist_add: Option<Vec<DenylistSubject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denylist_remove: Option<Vec<DenylistSubject>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<CommandTargets>,
}

/// A payload plus its detached base64url Ed25519 signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPacket {
    pub payload: Value,
    pub signature: String,
}

impl SignedPacket {
    /// Render the two-element `[payload, signature]` wire tuple.
    pub fn wire_tuple(&self) -> Value {
        Value::Array(vec![self.payload.clone(), Value::String(self.signature.clone())])
    }
}

// ---------------------------------------------------------------------------
// CommandBuilder
// ---------------------------------------------------------------------------

/// Composes denylist command payloads and delegates signing.
#[derive(Clone)]
pub struct CommandBuilder {
    signer: Arc<SigningService>,
}

impl CommandBuilder {
    pub fn new(signer: Arc<SigningService>) -> Self {
        Self { signer }
    }

    /// Build and sign a `DENYLIST_ADD` packet.
    pub fn denylist_add(
        &self,
        subjects: Vec<DenylistSubject>,
        device_ids: Vec<String>,
    ) -> Result<SignedPacket, SigningError> {
        self.build(CommandType::DenylistAdd, subjects, device_ids)
    }

    /// Build and sign a `DENYLIST_REMOVE` packet.
    ///
    /// Removal is unconditional on the receiver, so subject `exp` values
    /// are conventionally `0`.
    pub fn denylist_remove(
        &self,
        subjects: Vec<DenylistSubject>,
        device_ids: Vec<String>,
    ) -> Result<SignedPacket, SigningError> {
        self.build(CommandType::DenylistRemove, subjects, device_ids)
    }

    /// The single place that branches on [`CommandType`].
    fn build(
        &self,
        cmd_type: CommandType,
        subjects: Vec<DenylistSubject>,
        device_ids: Vec<String>,
    ) -> Result<SignedPacket, SigningError> {
        let (denylist_add, denylist_remove) = match cmd_type {
            CommandType::DenylistAdd => (Some(subjects), None),
            CommandType::DenylistRemove => (None, Some(subjects)),
        };

        let payload = CommandPayload {
            cmd_type,
            denylist_add,
            denylist_remove,
            targets: Some(CommandTargets { device_ids }),
        };

        self.signer.sign_command(serde_json::to_value(&payload)?)
    }
}
