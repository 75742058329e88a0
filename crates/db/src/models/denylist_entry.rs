//! Denylist entry model and DTOs.

use keyway_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from `device_denylist_entries`: "user `user_id` is currently denied
/// on device `device_id`, until `expires_at` (or permanently)."
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DenylistEntry {
    pub id: DbId,
    pub device_id: DbId,
    pub user_id: DbId,
    /// `None` means permanent denial; a past value means the entry is inert
    /// for authorization purposes even before physical deletion.
    pub expires_at: Option<Timestamp>,
    pub created_by: Option<DbId>,
    /// Display/audit cause, see `keyway_core::denylist::DenylistSource`.
    pub source: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a denylist entry.
#[derive(Debug, Clone)]
pub struct CreateDenylistEntry {
    pub device_id: DbId,
    pub user_id: DbId,
    pub expires_at: Option<Timestamp>,
    pub created_by: Option<DbId>,
    pub source: String,
}
