//! Domain layer for agentstore
//!
//! Models, repository ports, the error taxonomy and the tenant context. Nothing
//! in here talks to a database.

pub mod errors;
pub mod models;
pub mod ports;
pub mod tenant;

pub use errors::{DbResultExt, DomainError, DomainResult};
pub use tenant::TenantId;
