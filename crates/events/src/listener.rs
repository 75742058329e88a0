//! Access-revocation listener: the end-to-end denylist add/remove flows.
//!
//! Each trigger (unassignment, reassignment, user reactivation, key-share
//! grant/revoke) runs as a short-lived saga against the devices of the
//! affected unit:
//!
//! 1. resolve unit -> device set and facility,
//! 2. mutate the denylist store (the authoritative step -- failures here
//!    propagate and abort the flow),
//! 3. consult the skip policy,
//! 4. build a signed packet and hand it to the dispatcher (advisory --
//!    failures here are logged and swallowed, the store already committed).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use keyway_core::command::{CommandBuilder, DenylistSubject, SignedPacket};
use keyway_core::denylist::{should_skip_denylist_remove, DenylistAddPolicy, DenylistSource};
use keyway_core::error::SigningError;
use keyway_core::types::{DbId, Timestamp};
use keyway_db::models::denylist_entry::{CreateDenylistEntry, DenylistEntry};
use keyway_db::repositories::{DenylistRepo, DeviceRepo};
use keyway_db::DbPool;

use crate::bus::{AssignmentEvent, AssignmentEventKind};
use crate::dispatch::GatewayDispatcher;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failures a revocation flow can surface to its caller.
///
/// Dispatch failures are deliberately absent: wire delivery is advisory and
/// never affects the outcome of a flow.
#[derive(Debug, thiserror::Error)]
pub enum RevocationError {
    /// The unit has no devices, so there is nothing to deny.
    #[error("No devices resolved for unit {unit_id}")]
    NoDevices { unit_id: DbId },

    /// The authoritative store mutation failed; the flow was aborted before
    /// any wire dispatch.
    #[error("Persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The command packet could not be signed. Persisted state is intact.
    #[error("Signing failure: {0}")]
    Signing(#[from] SigningError),
}

// ---------------------------------------------------------------------------
// AccessRevocationListener
// ---------------------------------------------------------------------------

/// Orchestrates denylist mutations and gateway pushes for every
/// access-revocation trigger.
pub struct AccessRevocationListener {
    pool: DbPool,
    builder: CommandBuilder,
    dispatcher: Arc<dyn GatewayDispatcher>,
    add_policy: Arc<dyn DenylistAddPolicy>,
    route_pass_ttl_hours: i64,
}

impl AccessRevocationListener {
    pub fn new(
        pool: DbPool,
        builder: CommandBuilder,
        dispatcher: Arc<dyn GatewayDispatcher>,
        add_policy: Arc<dyn DenylistAddPolicy>,
        route_pass_ttl_hours: i64,
    ) -> Self {
        Self {
            pool,
            builder,
            dispatcher,
            add_policy,
            route_pass_ttl_hours,
        }
    }

    // -- Event loop ---------------------------------------------------------

    /// Consume assignment events until the bus closes or `cancel` fires.
    ///
    /// Handler failures are logged without stopping the loop; one bad event
    /// must not take the listener down.
    pub async fn run(
        &self,
        cancel: CancellationToken,
        mut receiver: broadcast::Receiver<AssignmentEvent>,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Access revocation listener cancelled");
                    break;
                }
                event = receiver.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = self.handle(&event).await {
                            tracing::error!(
                                unit_id = event.unit_id,
                                tenant_id = event.tenant_id,
                                error = %e,
                                "Assignment event handling failed"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Revocation listener lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Assignment bus closed, listener shutting down");
                        break;
                    }
                },
            }
        }
    }

    /// Route one event to the matching flow.
    async fn handle(&self, event: &AssignmentEvent) -> Result<(), RevocationError> {
        match event.kind {
            AssignmentEventKind::Unassigned => {
                self.revoke_unit_access(
                    event.unit_id,
                    event.tenant_id,
                    event.metadata.performed_by,
                    DenylistSource::UnitUnassignment,
                )
                .await
            }
            // A tenant named in an `assigned` or `updated` event currently
            // holds valid access, so no denylist rows may survive for them.
            AssignmentEventKind::Assigned | AssignmentEventKind::Updated => {
                self.restore_unit_access(event.unit_id, event.tenant_id).await
            }
        }
    }

    // -- Flows ----------------------------------------------------------------

    /// Unassignment: deny `user_id` on every device of `unit_id`.
    ///
    /// Persists one TTL-bounded entry per device, then (unless the skip
    /// policy suppresses it) pushes a single `DENYLIST_ADD` packet targeting
    /// the whole device set to the unit's facility.
    pub async fn revoke_unit_access(
        &self,
        unit_id: DbId,
        user_id: DbId,
        performed_by: Option<DbId>,
        source: DenylistSource,
    ) -> Result<(), RevocationError> {
        let device_ids = DeviceRepo::ids_for_unit(&self.pool, unit_id).await?;
        let Some(facility_id) = DeviceRepo::facility_for_unit(&self.pool, unit_id).await? else {
            return Err(RevocationError::NoDevices { unit_id });
        };

        let expires_at = Utc::now() + Duration::hours(self.route_pass_ttl_hours);
        let entries: Vec<CreateDenylistEntry> = device_ids
            .iter()
            .map(|&device_id| CreateDenylistEntry {
                device_id,
                user_id,
                expires_at: Some(expires_at),
                created_by: performed_by,
                source: source.as_str().to_string(),
            })
            .collect();

        // Authoritative mutation: failures propagate, nothing was pushed yet.
        DenylistRepo::bulk_create(&self.pool, &entries).await?;

        if self.add_policy.should_skip_add(user_id) {
            tracing::debug!(user_id, unit_id, "Denylist add push skipped by policy");
            return Ok(());
        }

        let subjects = vec![DenylistSubject {
            sub: user_id.to_string(),
            exp: expires_at.timestamp(),
        }];
        let targets = device_ids.iter().map(ToString::to_string).collect();
        let packet = self.builder.denylist_add(subjects, targets)?;

        self.dispatch(facility_id, Some(unit_id), user_id, packet).await;
        Ok(())
    }

    /// Reassignment: the user holds valid access again, so every denylist
    /// entry for `(unit, user)` must go.
    ///
    /// Rows are deleted unconditionally; a `DENYLIST_REMOVE` is pushed only
    /// for entries that are not already inert.
    pub async fn restore_unit_access(
        &self,
        unit_id: DbId,
        user_id: DbId,
    ) -> Result<(), RevocationError> {
        let entries =
            DenylistRepo::find_all_by_units_and_user(&self.pool, &[unit_id], user_id).await?;
        if entries.is_empty() {
            return Ok(());
        }

        // The store must never retain an entry for a user with valid access,
        // regardless of whether a wire command goes out.
        for entry in &entries {
            DenylistRepo::remove(&self.pool, entry.device_id, entry.user_id).await?;
        }

        let targets = push_targets(&entries);
        if targets.is_empty() {
            tracing::debug!(user_id, unit_id, "All entries already inert, no remove push");
            return Ok(());
        }

        let Some(facility_id) = DeviceRepo::facility_for_unit(&self.pool, unit_id).await? else {
            return Ok(());
        };

        let subjects = vec![DenylistSubject {
            sub: user_id.to_string(),
            exp: 0,
        }];
        let packet = self.builder.denylist_remove(subjects, targets)?;

        self.dispatch(facility_id, Some(unit_id), user_id, packet).await;
        Ok(())
    }

    /// User reactivation: clear the user's denylist entries everywhere,
    /// grouped so each facility receives exactly one remove packet covering
    /// only its own devices.
    pub async fn restore_user_access(&self, user_id: DbId) -> Result<(), RevocationError> {
        let entries = DenylistRepo::find_all_by_user(&self.pool, user_id).await?;
        if entries.is_empty() {
            return Ok(());
        }

        let device_ids: Vec<DbId> = entries.iter().map(|e| e.device_id).collect();
        let facility_pairs = DeviceRepo::facilities_for_devices(&self.pool, &device_ids).await?;

        // Authoritative mutation first.
        DenylistRepo::bulk_remove(&self.pool, &device_ids, user_id).await?;

        let now = Utc::now();
        let expiry_by_device: BTreeMap<DbId, Option<Timestamp>> =
            entries.iter().map(|e| (e.device_id, e.expires_at)).collect();

        let mut per_facility: BTreeMap<DbId, Vec<String>> = BTreeMap::new();
        for (device_id, facility_id) in facility_pairs {
            let inert = expiry_by_device
                .get(&device_id)
                .is_some_and(|exp| should_skip_denylist_remove(*exp, now));
            if !inert {
                per_facility.entry(facility_id).or_default().push(device_id.to_string());
            }
        }

        for (facility_id, targets) in per_facility {
            let subjects = vec![DenylistSubject {
                sub: user_id.to_string(),
                exp: 0,
            }];
            let packet = self.builder.denylist_remove(subjects, targets)?;
            self.dispatch(facility_id, None, user_id, packet).await;
        }
        Ok(())
    }

    /// Key-share grant: only an active, unexpired share restores access.
    pub async fn activate_key_share(
        &self,
        unit_id: DbId,
        invitee_id: DbId,
        active: bool,
        share_expires_at: Option<Timestamp>,
    ) -> Result<(), RevocationError> {
        if !active {
            return Ok(());
        }
        if share_expires_at.is_some_and(|at| at <= Utc::now()) {
            return Ok(());
        }
        self.restore_unit_access(unit_id, invitee_id).await
    }

    /// Key-share revocation: mirrors unassignment, but best-effort relative
    /// to the caller -- failures are logged, never surfaced.
    pub async fn revoke_key_share(&self, unit_id: DbId, invitee_id: DbId, performed_by: Option<DbId>) {
        if let Err(e) = self
            .revoke_unit_access(
                unit_id,
                invitee_id,
                performed_by,
                DenylistSource::KeySharingRevocation,
            )
            .await
        {
            tracing::error!(
                unit_id,
                invitee_id,
                error = %e,
                "Key-share revocation denylist flow failed"
            );
        }
    }

    // -- Dispatch (advisory) --------------------------------------------------

    /// Push a packet, logging failures instead of propagating them: the
    /// store already committed and is the source of truth.
    ///
    /// `unit_id` is `None` for user-scoped flows that span multiple units.
    async fn dispatch(
        &self,
        facility_id: DbId,
        unit_id: Option<DbId>,
        user_id: DbId,
        packet: SignedPacket,
    ) {
        if let Err(e) = self.dispatcher.unicast_to_facility(facility_id, &packet).await {
            tracing::error!(
                facility_id,
                unit_id,
                user_id,
                error = %e,
                "Gateway push failed; denylist store remains authoritative"
            );
        }
    }
}

/// Device-id targets for entries that still need a wire remove.
fn push_targets(entries: &[DenylistEntry]) -> Vec<String> {
    let now = Utc::now();
    entries
        .iter()
        .filter(|e| !should_skip_denylist_remove(e.expires_at, now))
        .map(|e| e.device_id.to_string())
        .collect()
}
