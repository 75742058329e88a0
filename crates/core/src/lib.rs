//! Keyway domain core: signing, command construction, and denylist policy.
//!
//! This crate holds the pure (non-persistence) building blocks of the
//! access-revocation engine:
//!
//! - [`signing::SigningService`] — operator Ed25519 keypair, signed command
//!   packets, and route-pass JWT issuance/verification.
//! - [`canonical`] — sorted-key JSON serialization so signatures are
//!   reproducible regardless of field insertion order.
//! - [`command::CommandBuilder`] — `DENYLIST_ADD` / `DENYLIST_REMOVE`
//!   payload composition.
//! - [`denylist`] — revocation source enum and the skip policy that
//!   suppresses redundant gateway traffic.

pub mod canonical;
pub mod command;
pub mod denylist;
pub mod error;
pub mod signing;
pub mod types;

pub use command::{CommandBuilder, CommandPayload, CommandType, DenylistSubject, SignedPacket};
pub use denylist::{AlwaysPush, DenylistAddPolicy, DenylistSource};
pub use error::{CoreError, SigningError};
pub use signing::{RoutePassClaims, SigningConfig, SigningService};
