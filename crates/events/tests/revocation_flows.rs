//! Integration tests for the access-revocation flows.
//!
//! Exercises the listener end to end against a real database, with a
//! recording dispatcher standing in for the gateway push so every packet
//! and unicast call can be asserted on.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;

use keyway_core::command::{CommandBuilder, SignedPacket};
use keyway_core::denylist::{AlwaysPush, DenylistAddPolicy, DenylistSource};
use keyway_core::types::DbId;
use keyway_core::signing::SigningService;
use keyway_db::models::denylist_entry::CreateDenylistEntry;
use keyway_db::models::device::CreateDevice;
use keyway_db::repositories::{DenylistRepo, DeviceRepo};
use keyway_events::dispatch::{DispatchError, GatewayDispatcher};
use keyway_events::listener::AccessRevocationListener;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Records every unicast call instead of pushing anywhere.
#[derive(Default)]
struct RecordingDispatcher {
    calls: Mutex<Vec<(DbId, SignedPacket)>>,
}

impl RecordingDispatcher {
    fn calls(&self) -> Vec<(DbId, SignedPacket)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatewayDispatcher for RecordingDispatcher {
    async fn unicast_to_facility(
        &self,
        facility_id: DbId,
        packet: &SignedPacket,
    ) -> Result<(), DispatchError> {
        self.calls.lock().unwrap().push((facility_id, packet.clone()));
        Ok(())
    }
}

/// Skip policy double with a fixed answer.
struct FixedSkip(bool);

impl DenylistAddPolicy for FixedSkip {
    fn should_skip_add(&self, _user_id: DbId) -> bool {
        self.0
    }
}

fn listener_with(
    pool: &PgPool,
    dispatcher: Arc<RecordingDispatcher>,
    add_policy: Arc<dyn DenylistAddPolicy>,
) -> AccessRevocationListener {
    let signer = Arc::new(SigningService::ephemeral().expect("ephemeral keypair"));
    AccessRevocationListener::new(
        pool.clone(),
        CommandBuilder::new(signer),
        dispatcher,
        add_policy,
        24,
    )
}

fn listener(pool: &PgPool, dispatcher: Arc<RecordingDispatcher>) -> AccessRevocationListener {
    listener_with(pool, dispatcher, Arc::new(AlwaysPush))
}

async fn new_device(pool: &PgPool, unit_id: i64, facility_id: i64) -> i64 {
    DeviceRepo::create(
        pool,
        &CreateDevice {
            unit_id,
            facility_id,
            name: format!("lock-{unit_id}"),
        },
    )
    .await
    .expect("device insert should succeed")
    .id
}

async fn entry_count(pool: &PgPool, user_id: i64) -> i64 {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM device_denylist_entries WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(pool)
            .await
            .unwrap();
    count
}

// ---------------------------------------------------------------------------
// Unassignment
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn unassignment_persists_entries_and_pushes_one_add(pool: PgPool) {
    let d1 = new_device(&pool, 10, 100).await;
    let d2 = new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    listener
        .revoke_unit_access(10, 7, Some(3), DenylistSource::UnitUnassignment)
        .await
        .unwrap();

    // One row per device, with the right source and actor.
    for device in [d1, d2] {
        let entry = DenylistRepo::find_by_device_and_user(&pool, device, 7)
            .await
            .unwrap()
            .expect("entry should exist per device");
        assert_eq!(entry.source, "unit_unassignment");
        assert_eq!(entry.created_by, Some(3));
        assert!(entry.expires_at.is_some(), "unassignment denials are TTL-bounded");
    }

    // Exactly one unicast to the unit's facility with a DENYLIST_ADD packet
    // targeting both devices.
    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 1);
    let (facility_id, packet) = &calls[0];
    assert_eq!(*facility_id, 100);
    assert_eq!(packet.payload["cmd_type"], "DENYLIST_ADD");
    assert_eq!(packet.payload["denylist_add"][0]["sub"], "7");
    assert_eq!(
        packet.payload["targets"]["device_ids"],
        serde_json::json!([d1.to_string(), d2.to_string()])
    );
}

#[sqlx::test(migrations = "../db/migrations")]
async fn unassignment_skip_policy_suppresses_push_but_not_rows(pool: PgPool) {
    new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener_with(&pool, Arc::clone(&dispatcher), Arc::new(FixedSkip(true)));

    listener
        .revoke_unit_access(10, 7, None, DenylistSource::UnitUnassignment)
        .await
        .unwrap();

    assert_eq!(entry_count(&pool, 7).await, 1, "row persisted despite skip");
    assert!(dispatcher.calls().is_empty(), "no wire command when skipped");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn unassignment_without_devices_fails(pool: PgPool) {
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    let result = listener
        .revoke_unit_access(99, 7, None, DenylistSource::UnitUnassignment)
        .await;

    assert!(result.is_err(), "a unit with no devices has nothing to deny");
    assert!(dispatcher.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Reassignment
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn reassignment_removes_rows_and_pushes_one_remove(pool: PgPool) {
    let d1 = new_device(&pool, 10, 100).await;
    let d2 = new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    listener
        .revoke_unit_access(10, 7, None, DenylistSource::UnitUnassignment)
        .await
        .unwrap();
    dispatcher.calls.lock().unwrap().clear();

    listener.restore_unit_access(10, 7).await.unwrap();

    assert_eq!(entry_count(&pool, 7).await, 0, "no row survives reassignment");

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 1);
    let (facility_id, packet) = &calls[0];
    assert_eq!(*facility_id, 100);
    assert_eq!(packet.payload["cmd_type"], "DENYLIST_REMOVE");
    assert_eq!(packet.payload["denylist_remove"][0]["sub"], "7");
    assert_eq!(packet.payload["denylist_remove"][0]["exp"], 0);
    assert_eq!(
        packet.payload["targets"]["device_ids"],
        serde_json::json!([d1.to_string(), d2.to_string()])
    );
}

#[sqlx::test(migrations = "../db/migrations")]
async fn reassignment_of_inert_entries_deletes_without_push(pool: PgPool) {
    let device = new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    // An already-expired denial: the gateway disregards it on its own.
    DenylistRepo::create(
        &pool,
        &CreateDenylistEntry {
            device_id: device,
            user_id: 7,
            expires_at: Some(Utc::now() - Duration::minutes(5)),
            created_by: None,
            source: "unit_unassignment".to_string(),
        },
    )
    .await
    .unwrap();

    listener.restore_unit_access(10, 7).await.unwrap();

    assert_eq!(entry_count(&pool, 7).await, 0, "inert row still deleted");
    assert!(dispatcher.calls().is_empty(), "no wire command for inert rows");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn reassignment_with_no_entries_is_a_no_op(pool: PgPool) {
    new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    listener.restore_unit_access(10, 7).await.unwrap();

    assert!(dispatcher.calls().is_empty());
}

// ---------------------------------------------------------------------------
// User reactivation
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn reactivation_sends_one_remove_per_facility(pool: PgPool) {
    let d1 = new_device(&pool, 10, 100).await;
    let d2 = new_device(&pool, 20, 200).await;
    let d3 = new_device(&pool, 21, 200).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    for device in [d1, d2, d3] {
        DenylistRepo::create(
            &pool,
            &CreateDenylistEntry {
                device_id: device,
                user_id: 7,
                expires_at: None,
                created_by: None,
                source: "user_deactivation".to_string(),
            },
        )
        .await
        .unwrap();
    }

    listener.restore_user_access(7).await.unwrap();

    assert_eq!(entry_count(&pool, 7).await, 0);

    let calls = dispatcher.calls();
    assert_eq!(calls.len(), 2, "one packet per facility");

    let (facility_a, packet_a) = &calls[0];
    assert_eq!(*facility_a, 100);
    assert_eq!(
        packet_a.payload["targets"]["device_ids"],
        serde_json::json!([d1.to_string()])
    );

    let (facility_b, packet_b) = &calls[1];
    assert_eq!(*facility_b, 200);
    assert_eq!(
        packet_b.payload["targets"]["device_ids"],
        serde_json::json!([d2.to_string(), d3.to_string()])
    );
}

// ---------------------------------------------------------------------------
// Key sharing
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../db/migrations")]
async fn inactive_or_expired_share_does_nothing(pool: PgPool) {
    let device = new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    DenylistRepo::create(
        &pool,
        &CreateDenylistEntry {
            device_id: device,
            user_id: 9,
            expires_at: None,
            created_by: None,
            source: "key_sharing_revocation".to_string(),
        },
    )
    .await
    .unwrap();

    listener.activate_key_share(10, 9, false, None).await.unwrap();
    listener
        .activate_key_share(10, 9, true, Some(Utc::now() - Duration::hours(1)))
        .await
        .unwrap();

    assert_eq!(entry_count(&pool, 9).await, 1, "inactive shares change nothing");
    assert!(dispatcher.calls().is_empty());
}

#[sqlx::test(migrations = "../db/migrations")]
async fn active_share_restores_access(pool: PgPool) {
    let device = new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    DenylistRepo::create(
        &pool,
        &CreateDenylistEntry {
            device_id: device,
            user_id: 9,
            expires_at: None,
            created_by: None,
            source: "key_sharing_revocation".to_string(),
        },
    )
    .await
    .unwrap();

    listener
        .activate_key_share(10, 9, true, Some(Utc::now() + Duration::hours(1)))
        .await
        .unwrap();

    assert_eq!(entry_count(&pool, 9).await, 0);
    assert_eq!(dispatcher.calls().len(), 1);
    assert_eq!(dispatcher.calls()[0].1.payload["cmd_type"], "DENYLIST_REMOVE");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn share_revocation_is_fire_and_forget(pool: PgPool) {
    let device = new_device(&pool, 10, 100).await;
    let dispatcher = Arc::new(RecordingDispatcher::default());
    let listener = listener(&pool, Arc::clone(&dispatcher));

    // Succeeds: persists a TTL-bounded denial and pushes an ADD.
    listener.revoke_key_share(10, 9, Some(3)).await;
    assert_eq!(entry_count(&pool, 9).await, 1);
    assert_eq!(dispatcher.calls().len(), 1);

    let entry = DenylistRepo::find_by_device_and_user(&pool, device, 9)
        .await
        .unwrap()
        .expect("denial for the invitee");
    assert_eq!(entry.source, "key_sharing_revocation");

    // A unit with no devices fails internally but never surfaces the error.
    listener.revoke_key_share(999, 9, None).await;
}
