use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Artifact, ArtifactFilter, ArtifactStats};

/// Repository trait for artifact indexing
///
/// Scoped to the current tenant. Soft-deleted artifacts are hidden from every
/// read except [`ArtifactRepository::list`] with `include_deleted`.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    /// Upserts artifact metadata keyed by id.
    async fn index(&self, artifact: &Artifact) -> DomainResult<()>;

    async fn update(&self, artifact: &Artifact) -> DomainResult<()> {
        self.index(artifact).await
    }

    async fn get(&self, artifact_id: &str) -> DomainResult<Option<Artifact>>;

    /// Most recent live artifact with this name, preferring one scoped to `session_id`.
    async fn get_by_name(&self, name: &str, session_id: Option<&str>) -> DomainResult<Option<Artifact>>;

    /// Newest first.
    async fn list(&self, filter: &ArtifactFilter) -> DomainResult<Vec<Artifact>>;

    /// Full-text search over name, purpose and tags, most relevant first.
    async fn search(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: Option<i64>,
    ) -> DomainResult<Vec<Artifact>>;

    async fn soft_delete(&self, artifact_id: &str) -> DomainResult<()>;

    async fn delete(&self, artifact_id: &str) -> DomainResult<()>;

    /// Bumps the access count and last-access timestamp.
    async fn record_access(&self, artifact_id: &str) -> DomainResult<()>;

    async fn stats(&self) -> DomainResult<ArtifactStats>;
}
