//! In-process assignment event bus backed by a `tokio::sync::broadcast`
//! channel.
//!
//! [`AssignmentEventBus`] is the publish/subscribe hub for
//! [`AssignmentEvent`]s. It is designed to be shared via
//! `Arc<AssignmentEventBus>` across the application. Each subscriber owns
//! an independent receiver, so a slow or failing subscriber never blocks
//! publishing or the other subscribers.

use chrono::{DateTime, Utc};
use keyway_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// AssignmentEvent
// ---------------------------------------------------------------------------

/// What happened to the unit assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentEventKind {
    Assigned,
    Unassigned,
    Updated,
}

/// Where the assignment mutation originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    Manual,
    FmsSync,
    Api,
}

/// Event metadata: origin, acting user, and the FMS sync batch if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentMetadata {
    pub source: AssignmentSource,
    pub performed_by: Option<DbId>,
    pub sync_log_id: Option<DbId>,
}

/// A unit-assignment mutation that already committed.
///
/// Ephemeral: created and consumed within a single in-process dispatch.
/// Handlers must not assume ordering beyond "emitted after the underlying
/// assignment mutation committed."
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentEvent {
    pub kind: AssignmentEventKind,
    pub unit_id: DbId,
    pub facility_id: DbId,
    /// The tenant (user) whose access changed.
    pub tenant_id: DbId,
    pub access_type: Option<String>,
    pub metadata: AssignmentMetadata,
    pub timestamp: DateTime<Utc>,
}

impl AssignmentEvent {
    /// Create a new event with manual source and no actor.
    pub fn new(kind: AssignmentEventKind, unit_id: DbId, facility_id: DbId, tenant_id: DbId) -> Self {
        Self {
            kind,
            unit_id,
            facility_id,
            tenant_id,
            access_type: None,
            metadata: AssignmentMetadata {
                source: AssignmentSource::Manual,
                performed_by: None,
                sync_log_id: None,
            },
            timestamp: Utc::now(),
        }
    }

    /// Set the access type granted or removed.
    pub fn with_access_type(mut self, access_type: impl Into<String>) -> Self {
        self.access_type = Some(access_type.into());
        self
    }

    /// Set the origin of the mutation.
    pub fn with_source(mut self, source: AssignmentSource) -> Self {
        self.metadata.source = source;
        self
    }

    /// Attach the acting user.
    pub fn with_performed_by(mut self, user_id: DbId) -> Self {
        self.metadata.performed_by = Some(user_id);
        self
    }

    /// Attach the FMS sync batch that produced the mutation.
    pub fn with_sync_log(mut self, sync_log_id: DbId) -> Self {
        self.metadata.sync_log_id = Some(sync_log_id);
        self
    }
}

// ---------------------------------------------------------------------------
// AssignmentEventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for assignment events.
pub struct AssignmentEventBus {
    sender: broadcast::Sender<AssignmentEvent>,
}

impl AssignmentEventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: AssignmentEvent) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<AssignmentEvent> {
        self.sender.subscribe()
    }
}

impl Default for AssignmentEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
