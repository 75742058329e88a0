//! Repository for the `gateways` table.

use sqlx::PgPool;

use keyway_core::types::DbId;

use crate::models::gateway::{CreateGateway, Gateway};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, facility_id, endpoint_url, created_at, updated_at";

/// Provides CRUD operations for facility gateways.
pub struct GatewayRepo;

impl GatewayRepo {
    /// Register a gateway, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateGateway) -> Result<Gateway, sqlx::Error> {
        let query = format!(
            "INSERT INTO gateways (facility_id, endpoint_url)
             VALUES ($1, $2)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Gateway>(&query)
            .bind(input.facility_id)
            .bind(&input.endpoint_url)
            .fetch_one(pool)
            .await
    }

    /// Push endpoints for every gateway in a facility.
    pub async fn endpoints_for_facility(
        pool: &PgPool,
        facility_id: DbId,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            "SELECT endpoint_url FROM gateways WHERE facility_id = $1 ORDER BY id",
        )
        .bind(facility_id)
        .fetch_all(pool)
        .await
    }
}
