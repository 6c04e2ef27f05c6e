//! Configuration loading
//!
//! Layers programmatic defaults, `agentstore.yaml`, `agentstore.local.yaml`
//! and `AGENTSTORE_*` environment variables with figment, then validates the
//! database, logging and retention sections.

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};
