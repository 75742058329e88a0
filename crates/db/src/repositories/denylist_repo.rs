//! Repository for the `device_denylist_entries` table.
//!
//! Invariant: at most one entry exists per `(device_id, user_id)` pair.
//! Every write path that could create a duplicate performs delete-then-insert
//! inside a single transaction, so racing writers for the same pair converge
//! to last-writer-wins rather than duplicate rows.
//!
//! "Active" queries exclude rows whose `expires_at` has already passed;
//! expired rows are inert for authorization before physical deletion, which
//! is cleanup (`prune_expired`), not a correctness requirement.

use sqlx::PgPool;

use keyway_core::types::DbId;

use crate::models::denylist_entry::{CreateDenylistEntry, DenylistEntry};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str =
    "id, device_id, user_id, expires_at, created_by, source, created_at, updated_at";

/// Predicate selecting entries that are still effective.
const ACTIVE: &str = "(expires_at IS NULL OR expires_at > NOW())";

/// Provides CRUD operations for denylist entries.
pub struct DenylistRepo;

impl DenylistRepo {
    /// Insert an entry, atomically replacing any existing row for the same
    /// `(device_id, user_id)` pair. Returns the stored row.
    pub async fn create(
        pool: &PgPool,
        input: &CreateDenylistEntry,
    ) -> Result<DenylistEntry, sqlx::Error> {
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM device_denylist_entries WHERE device_id = $1 AND user_id = $2")
            .bind(input.device_id)
            .bind(input.user_id)
            .execute(&mut *tx)
            .await?;

        let query = format!(
            "INSERT INTO device_denylist_entries (device_id, user_id, expires_at, created_by, source)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {COLUMNS}"
        );
        let entry = sqlx::query_as::<_, DenylistEntry>(&query)
            .bind(input.device_id)
            .bind(input.user_id)
            .bind(input.expires_at)
            .bind(input.created_by)
            .bind(&input.source)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(entry)
    }

    /// Bulk insert entries for a single user.
    ///
    /// Deletes all prior rows for `(user_id, device_id IN inputs)` in one
    /// statement, then inserts all new rows in one statement, both inside a
    /// single transaction. No-ops on empty input without issuing any queries.
    pub async fn bulk_create(
        pool: &PgPool,
        inputs: &[CreateDenylistEntry],
    ) -> Result<(), sqlx::Error> {
        let Some(first) = inputs.first() else {
            return Ok(());
        };
        let user_id = first.user_id;
        debug_assert!(
            inputs.iter().all(|i| i.user_id == user_id),
            "bulk_create inputs must share one user"
        );

        let device_ids: Vec<DbId> = inputs.iter().map(|i| i.device_id).collect();
        let expires: Vec<Option<keyway_core::types::Timestamp>> =
            inputs.iter().map(|i| i.expires_at).collect();
        let created_by: Vec<Option<DbId>> = inputs.iter().map(|i| i.created_by).collect();
        let sources: Vec<String> = inputs.iter().map(|i| i.source.clone()).collect();

        let mut tx = pool.begin().await?;

        sqlx::query(
            "DELETE FROM device_denylist_entries WHERE user_id = $1 AND device_id = ANY($2)",
        )
        .bind(user_id)
        .bind(&device_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO device_denylist_entries (device_id, user_id, expires_at, created_by, source)
             SELECT d, $2, e, c, s
             FROM UNNEST($1::bigint[], $3::timestamptz[], $4::bigint[], $5::text[]) AS t(d, e, c, s)",
        )
        .bind(&device_ids)
        .bind(user_id)
        .bind(&expires)
        .bind(&created_by)
        .bind(&sources)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Active entries for a device.
    pub async fn find_by_device(
        pool: &PgPool,
        device_id: DbId,
    ) -> Result<Vec<DenylistEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM device_denylist_entries
             WHERE device_id = $1 AND {ACTIVE}
             ORDER BY id"
        );
        sqlx::query_as::<_, DenylistEntry>(&query)
            .bind(device_id)
            .fetch_all(pool)
            .await
    }

    /// Active entries for a user, across all devices.
    pub async fn find_by_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<DenylistEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM device_denylist_entries
             WHERE user_id = $1 AND {ACTIVE}
             ORDER BY id"
        );
        sqlx::query_as::<_, DenylistEntry>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// The active entry for a `(device, user)` pair, if any.
    pub async fn find_by_device_and_user(
        pool: &PgPool,
        device_id: DbId,
        user_id: DbId,
    ) -> Result<Option<DenylistEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM device_denylist_entries
             WHERE device_id = $1 AND user_id = $2 AND {ACTIVE}"
        );
        sqlx::query_as::<_, DenylistEntry>(&query)
            .bind(device_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// Active entries for a user on any device belonging to the given units.
    ///
    /// Resolves unit -> device membership first; returns empty without a
    /// second query when no devices resolve.
    pub async fn find_by_units_and_user(
        pool: &PgPool,
        unit_ids: &[DbId],
        user_id: DbId,
    ) -> Result<Vec<DenylistEntry>, sqlx::Error> {
        let device_ids = Self::device_ids_for_units(pool, unit_ids).await?;
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {COLUMNS} FROM device_denylist_entries
             WHERE user_id = $1 AND device_id = ANY($2) AND {ACTIVE}
             ORDER BY id"
        );
        sqlx::query_as::<_, DenylistEntry>(&query)
            .bind(user_id)
            .bind(&device_ids)
            .fetch_all(pool)
            .await
    }

    /// All entries for a user on any device of the given units, including
    /// expired rows. The revocation flows use this so that inert entries are
    /// still cleaned up (the skip policy decides the wire push separately).
    pub async fn find_all_by_units_and_user(
        pool: &PgPool,
        unit_ids: &[DbId],
        user_id: DbId,
    ) -> Result<Vec<DenylistEntry>, sqlx::Error> {
        let device_ids = Self::device_ids_for_units(pool, unit_ids).await?;
        if device_ids.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "SELECT {COLUMNS} FROM device_denylist_entries
             WHERE user_id = $1 AND device_id = ANY($2)
             ORDER BY id"
        );
        sqlx::query_as::<_, DenylistEntry>(&query)
            .bind(user_id)
            .bind(&device_ids)
            .fetch_all(pool)
            .await
    }

    /// All entries for a user, including expired rows.
    pub async fn find_all_by_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<DenylistEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM device_denylist_entries
             WHERE user_id = $1
             ORDER BY id"
        );
        sqlx::query_as::<_, DenylistEntry>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Unconditional delete of one `(device, user)` pair, regardless of
    /// expiry. Returns `true` if a row was actually deleted.
    pub async fn remove(pool: &PgPool, device_id: DbId, user_id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM device_denylist_entries WHERE device_id = $1 AND user_id = $2",
        )
        .bind(device_id)
        .bind(user_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete all entries for a user on the given devices in one statement.
    /// Returns 0 without querying when `device_ids` is empty.
    pub async fn bulk_remove(
        pool: &PgPool,
        device_ids: &[DbId],
        user_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        if device_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "DELETE FROM device_denylist_entries WHERE user_id = $1 AND device_id = ANY($2)",
        )
        .bind(user_id)
        .bind(device_ids)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Delete all entries for a user on any device belonging to the given
    /// units. Returns 0 if no devices resolve.
    pub async fn bulk_remove_for_units(
        pool: &PgPool,
        unit_ids: &[DbId],
        user_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let device_ids = Self::device_ids_for_units(pool, unit_ids).await?;
        Self::bulk_remove(pool, &device_ids, user_id).await
    }

    /// Delete all rows whose expiry has passed. Idempotent and safe to run
    /// concurrently with other mutations. Returns the count of deleted rows.
    pub async fn prune_expired(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM device_denylist_entries
             WHERE expires_at IS NOT NULL AND expires_at <= NOW()",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Resolve unit membership to device ids.
    async fn device_ids_for_units(
        pool: &PgPool,
        unit_ids: &[DbId],
    ) -> Result<Vec<DbId>, sqlx::Error> {
        if unit_ids.is_empty() {
            return Ok(Vec::new());
        }
        sqlx::query_scalar::<_, DbId>("SELECT id FROM devices WHERE unit_id = ANY($1)")
            .bind(unit_ids)
            .fetch_all(pool)
            .await
    }
}
