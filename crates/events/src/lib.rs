//! Keyway event bus and revocation orchestration.
//!
//! This crate wires the denylist engine together:
//!
//! - [`AssignmentEventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`, carrying typed unit-assignment events.
//! - [`GatewayDispatcher`] — facility-scoped push capability for signed
//!   command packets, with an HTTP implementation and an outbox wrapper
//!   that makes the best-effort delivery gap explicit.
//! - [`AccessRevocationListener`] — subscribes to assignment events and
//!   runs the end-to-end denylist add/remove flows.
//! - [`PruneScheduler`] — recurring cleanup of expired denylist rows.

pub mod bus;
pub mod dispatch;
pub mod listener;
pub mod pruning;

pub use bus::{AssignmentEvent, AssignmentEventBus, AssignmentEventKind, AssignmentSource};
pub use dispatch::{DispatchError, DispatchOutbox, GatewayDispatcher, HttpGatewayDispatcher};
pub use listener::{AccessRevocationListener, RevocationError};
pub use pruning::PruneScheduler;
