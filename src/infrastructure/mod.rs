//! Infrastructure layer module
//!
//! - Configuration management
//! - Logging infrastructure and the audit trail

pub mod config;
pub mod logging;
