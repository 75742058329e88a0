//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod denylist_repo;
pub mod device_repo;
pub mod gateway_repo;

pub use denylist_repo::DenylistRepo;
pub use device_repo::DeviceRepo;
pub use gateway_repo::GatewayRepo;
