//! Physical lock device model and DTOs.

use keyway_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `devices` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Device {
    pub id: DbId,
    pub unit_id: DbId,
    pub facility_id: DbId,
    pub name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a device.
#[derive(Debug, Clone)]
pub struct CreateDevice {
    pub unit_id: DbId,
    pub facility_id: DbId,
    pub name: String,
}
