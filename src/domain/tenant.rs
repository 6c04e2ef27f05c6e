//! Tenant identity carried through a task's call chain.
//!
//! Every tenant-scoped store method reads the tenant from here. There is no
//! default tenant: calling a store outside [`scope`] fails with
//! [`DomainError::MissingTenant`] before any database work starts.

use std::fmt;
use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

const MAX_TENANT_LEN: usize = 255;

tokio::task_local! {
    static CURRENT_TENANT: TenantId;
}

/// Identifier of the tenant that owns a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> DomainResult<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Validation("tenant id cannot be empty".to_string()));
        }
        if trimmed.len() > MAX_TENANT_LEN {
            return Err(DomainError::Validation(format!(
                "tenant id exceeds {MAX_TENANT_LEN} bytes"
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(DomainError::Validation(
                "tenant id contains control characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tenant bound to the running task.
    pub fn current() -> DomainResult<Self> {
        CURRENT_TENANT
            .try_with(Clone::clone)
            .map_err(|_| DomainError::MissingTenant)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TenantId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(value: TenantId) -> Self {
        value.0
    }
}

/// Run `fut` with `tenant` bound as the current tenant.
///
/// Scopes nest: an inner scope shadows the outer tenant until it completes.
/// Tasks spawned from inside the future do not inherit the binding.
pub async fn scope<F>(tenant: TenantId, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_TENANT.scope(tenant, fut).await
}
