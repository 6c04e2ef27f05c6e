//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that storage adapters must implement:
//! - SessionRepository: sessions, messages, tool executions and memory snapshots
//! - ArtifactRepository: artifact indexing and search
//! - ErrorRepository: recorded tool errors
//! - ResultRepository: cached tabular results
//! - AdminRepository: cross-tenant reporting and purge

pub mod admin_repository;
pub mod artifact_repository;
pub mod error_repository;
pub mod result_repository;
pub mod session_repository;

pub use admin_repository::AdminRepository;
pub use artifact_repository::ArtifactRepository;
pub use error_repository::ErrorRepository;
pub use result_repository::ResultRepository;
pub use session_repository::{SessionCleanupHook, SessionRepository, DEFAULT_SEARCH_LIMIT};
