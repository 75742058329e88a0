//! Facility gateway model and DTOs.

use keyway_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `gateways` table: a facility-local bridge that receives
/// signed commands and enforces them against physical lock devices.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Gateway {
    pub id: DbId,
    pub facility_id: DbId,
    pub endpoint_url: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a gateway.
#[derive(Debug, Clone)]
pub struct CreateGateway {
    pub facility_id: DbId,
    pub endpoint_url: String,
}
