use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ErrorFilter, StoredError};

/// Append-only store of tool errors for the current tenant
#[async_trait]
pub trait ErrorRepository: Send + Sync {
    /// Records an error built from raw error text and returns it.
    async fn store(&self, session_id: &str, tool_name: &str, raw_error: &str) -> DomainResult<StoredError>;

    async fn get(&self, error_id: &str) -> DomainResult<Option<StoredError>>;

    /// Newest first.
    async fn list(&self, filter: &ErrorFilter) -> DomainResult<Vec<StoredError>>;
}
