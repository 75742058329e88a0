//! Domain model structs and DTOs.
//!
//! Each submodule contains a `FromRow` + `Serialize` entity struct matching
//! the database row plus a create DTO for inserts.

pub mod denylist_entry;
pub mod device;
pub mod gateway;
