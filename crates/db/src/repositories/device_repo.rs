//! Repository for the `devices` table.
//!
//! Besides CRUD, this is the resolution capability the revocation flows
//! consume: `unit_id -> device_ids[]` and `device_id -> facility_id`.

use sqlx::PgPool;

use keyway_core::types::DbId;

use crate::models::device::{CreateDevice, Device};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, unit_id, facility_id, name, created_at, updated_at";

/// Provides CRUD and membership-resolution operations for devices.
pub struct DeviceRepo;

impl DeviceRepo {
    /// Register a device, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateDevice) -> Result<Device, sqlx::Error> {
        let query = format!(
            "INSERT INTO devices (unit_id, facility_id, name)
             VALUES ($1, $2, $3)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Device>(&query)
            .bind(input.unit_id)
            .bind(input.facility_id)
            .bind(&input.name)
            .fetch_one(pool)
            .await
    }

    /// All device ids belonging to a unit.
    pub async fn ids_for_unit(pool: &PgPool, unit_id: DbId) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("SELECT id FROM devices WHERE unit_id = $1 ORDER BY id")
            .bind(unit_id)
            .fetch_all(pool)
            .await
    }

    /// The facility a unit's devices live in, if the unit has any devices.
    pub async fn facility_for_unit(
        pool: &PgPool,
        unit_id: DbId,
    ) -> Result<Option<DbId>, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>("SELECT facility_id FROM devices WHERE unit_id = $1 LIMIT 1")
            .bind(unit_id)
            .fetch_optional(pool)
            .await
    }

    /// `(device_id, facility_id)` pairs for the given devices, used to group
    /// per-facility in the user-reactivation flow.
    pub async fn facilities_for_devices(
        pool: &PgPool,
        device_ids: &[DbId],
    ) -> Result<Vec<(DbId, DbId)>, sqlx::Error> {
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_as::<_, (DbId, DbId)>(
            "SELECT id, facility_id FROM devices WHERE id = ANY($1) ORDER BY id",
        )
        .bind(device_ids)
        .fetch_all(pool)
        .await
    }
}
