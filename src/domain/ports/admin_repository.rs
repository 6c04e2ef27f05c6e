/// Admin repository port.
///
/// Implementations read across every tenant and must only be handed to a
/// trusted administrative surface.
use async_trait::async_trait;
use chrono::Duration;

use crate::domain::errors::DomainResult;
use crate::domain::models::{PurgeReport, SessionPage, SystemStats, TenantSessionCount};

#[async_trait]
pub trait AdminRepository: Send + Sync {
    /// Sessions of all tenants, soft-deleted ones included, most recently
    /// updated first, with the total count.
    async fn list_all_sessions(&self, limit: i64, offset: i64) -> DomainResult<SessionPage>;

    /// Live session counts per tenant, largest first.
    async fn count_sessions_by_tenant(&self) -> DomainResult<Vec<TenantSessionCount>>;

    async fn system_stats(&self) -> DomainResult<SystemStats>;

    /// Whether a live session with this id exists for any tenant.
    async fn session_visible_to_any_tenant(&self, session_id: &str) -> DomainResult<bool>;

    /// Hard-deletes rows soft-deleted longer ago than `grace`.
    async fn purge_soft_deleted(&self, grace: Duration) -> DomainResult<PurgeReport>;
}
