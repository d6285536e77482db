//! `bookbuddy-core`: tenant and table primitives for the data layer.
//!
//! This crate contains **pure** building blocks (no I/O): identifiers, the
//! error model, table naming and the tenant-isolation policy.

pub mod error;
pub mod id;
pub mod record;
pub mod table;
pub mod tenant;

pub use error::{DataError, DataResult};
pub use id::{TenantId, UserId};
pub use record::{Record, record_from_value, render_value};
pub use table::{AppTable, Table};
pub use tenant::TenantPolicy;
