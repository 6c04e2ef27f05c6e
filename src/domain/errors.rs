//! Domain errors for the agentstore persistence layer.

use thiserror::Error;

/// SQLSTATE raised by PostgreSQL when a row-level security policy rejects a row.
const INSUFFICIENT_PRIVILEGE: &str = "42501";

/// Domain-level errors that can occur in any store.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("missing tenant identity: no tenant is bound to the current task")]
    MissingTenant,

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("row-level security policy rejected {operation}: {message}")]
    PolicyViolation { operation: String, message: String },

    #[error("database error during {operation}: {source}")]
    Database {
        operation: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("privileged connection lacks row-security bypass: {0}")]
    PrivilegeMissing(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Wrap a database error with the name of the operation that produced it.
    ///
    /// Row-level security rejections are surfaced as [`DomainError::PolicyViolation`]
    /// so callers can treat them as security events instead of retrying.
    pub fn from_sqlx(operation: impl Into<String>, source: sqlx::Error) -> Self {
        let operation = operation.into();
        if let sqlx::Error::Database(db_err) = &source {
            if db_err.code().as_deref() == Some(INSUFFICIENT_PRIVILEGE) {
                let message = db_err.message().to_string();
                tracing::error!(
                    target: "audit",
                    operation = %operation,
                    message = %message,
                    "row-level security policy violation"
                );
                return Self::PolicyViolation { operation, message };
            }
        }
        Self::Database { operation, source }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub const fn is_policy_violation(&self) -> bool {
        matches!(self, Self::PolicyViolation { .. })
    }

    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Attach an operation name to a raw `sqlx` result.
pub trait DbResultExt<T> {
    fn db_context(self, operation: &str) -> DomainResult<T>;
}

impl<T> DbResultExt<T> for Result<T, sqlx::Error> {
    fn db_context(self, operation: &str) -> DomainResult<T> {
        self.map_err(|e| DomainError::from_sqlx(operation, e))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        Self::from_sqlx("query", err)
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
