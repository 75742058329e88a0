//! Denylist source enum and wire-traffic skip policy.
//!
//! Gateways sit on constrained links; every suppressed command is a
//! bandwidth and latency win with no correctness cost, because the
//! persisted denylist remains the source of truth independent of whether
//! a device was informed.

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Source constants
// ---------------------------------------------------------------------------

/// Denial caused by a tenant being unassigned from a unit.
pub const SOURCE_UNIT_UNASSIGNMENT: &str = "unit_unassignment";
/// Denial caused by a user account being deactivated.
pub const SOURCE_USER_DEACTIVATION: &str = "user_deactivation";
/// Denial caused by a key share being revoked.
pub const SOURCE_KEY_SHARING_REVOCATION: &str = "key_sharing_revocation";

/// All valid denylist sources.
pub const VALID_SOURCES: &[&str] = &[
    SOURCE_UNIT_UNASSIGNMENT,
    SOURCE_USER_DEACTIVATION,
    SOURCE_KEY_SHARING_REVOCATION,
];

// ---------------------------------------------------------------------------
// DenylistSource
// ---------------------------------------------------------------------------

/// What caused a denylist entry to exist. Display/audit only; flow logic
/// never branches on it beyond optimization decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenylistSource {
    UnitUnassignment,
    UserDeactivation,
    KeySharingRevocation,
}

impl DenylistSource {
    /// Return the database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnitUnassignment => SOURCE_UNIT_UNASSIGNMENT,
            Self::UserDeactivation => SOURCE_USER_DEACTIVATION,
            Self::KeySharingRevocation => SOURCE_KEY_SHARING_REVOCATION,
        }
    }

    /// Parse from a string, returning an error for unknown sources.
    pub fn from_str(s: &str) -> Result<Self, CoreError> {
        match s {
            SOURCE_UNIT_UNASSIGNMENT => Ok(Self::UnitUnassignment),
            SOURCE_USER_DEACTIVATION => Ok(Self::UserDeactivation),
            SOURCE_KEY_SHARING_REVOCATION => Ok(Self::KeySharingRevocation),
            other => Err(CoreError::Validation(format!(
                "Unknown denylist source: '{other}'. Valid sources: {}",
                VALID_SOURCES.join(", ")
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Skip policy
// ---------------------------------------------------------------------------

/// True when a `DENYLIST_REMOVE` push is unnecessary for an entry with the
/// given expiry: the entry is already inert, the gateway disregards it on
/// its own. The DB row must still be deleted for hygiene.
pub fn should_skip_denylist_remove(expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    match expires_at {
        Some(at) => at <= now,
        None => false,
    }
}

/// Decides whether a `DENYLIST_ADD` push can be skipped for a user.
///
/// The exact business rule is expected to evolve, so it is injected at the
/// composition root. Contract: `true` implies it is safe to skip the wire
/// push while still persisting the DB row.
pub trait DenylistAddPolicy: Send + Sync {
    fn should_skip_add(&self, user_id: DbId) -> bool;
}

/// Default policy: never skip, every add is pushed.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysPush;

impl DenylistAddPolicy for AlwaysPush {
    fn should_skip_add(&self, _user_id: DbId) -> bool {
        false
    }
}
