//! Agentstore - multi-tenant persistence for agent sessions
//!
//! Agentstore stores sessions, messages, tool executions, memory snapshots,
//! artifacts, tool errors and cached tabular results in PostgreSQL. Tenant
//! isolation is enforced by row-level security: every tenant-scoped
//! transaction binds the caller's tenant before running any statement.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors, tenant context and repository ports
//! - **Adapters** (`adapters`): PostgreSQL executors, migrator and repositories
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): migration and administration commands
//!
//! # Example
//!
//! ```no_run
//! use agentstore::{tenant, ConfigLoader, Session, SessionRepository, StorageBackend, TenantId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let backend = StorageBackend::connect(&config).await?;
//!     let sessions = backend.sessions();
//!
//!     tenant::scope(TenantId::new("alice")?, async {
//!         sessions.save_session(&Session::new("s1", "helper")).await
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use adapters::postgres::{DatabaseError, Migrator, StorageBackend};
pub use domain::models::{
    Artifact, ArtifactFilter, ArtifactSource, Config, DatabaseConfig, LoggingConfig, MemorySnapshot, Message,
    MessageRole, QueryResult, ResultMetadata, Session, SessionStats, StoredError, TabularData, ToolExecution,
};
pub use domain::ports::{
    AdminRepository, ArtifactRepository, ErrorRepository, ResultRepository, SessionCleanupHook, SessionRepository,
};
pub use domain::tenant::{self, TenantId};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
