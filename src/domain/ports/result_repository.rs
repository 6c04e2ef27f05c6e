use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{QueryResult, ResultMetadata, TabularData};

/// Cache of tabular results, one physical table per result
#[async_trait]
pub trait ResultRepository: Send + Sync {
    /// Stores `data` under `result_id`, replacing a previous result with that id.
    ///
    /// # Errors
    /// - `InvalidIdentifier` for an unsafe id or column name, before any SQL runs
    /// - `PolicyViolation` when the id is taken by another tenant
    async fn store(&self, result_id: &str, data: &TabularData) -> DomainResult<ResultMetadata>;

    /// Returns the whole result in insertion order.
    ///
    /// Only an empty `filter` is accepted; predicates are rejected.
    ///
    /// # Errors
    /// - `NotFound` when the tenant has no result with this id
    async fn query(&self, result_id: &str, filter: Option<&str>) -> DomainResult<QueryResult>;

    async fn get_metadata(&self, result_id: &str) -> DomainResult<Option<ResultMetadata>>;

    /// Drops the result table and its metadata. A missing result is a no-op.
    async fn delete(&self, result_id: &str) -> DomainResult<()>;
}
