/// Domain models for artifacts.
///
/// Artifacts are files either uploaded by a user or produced by an agent.
/// Names are not unique: several artifacts may share a name across sessions.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::DomainError;

/// Where an artifact came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactSource {
    /// Provided by the user
    User,
    /// Produced by an agent or tool
    Generated,
}

impl ArtifactSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Generated => "generated",
        }
    }
}

impl fmt::Display for ArtifactSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "generated" => Ok(Self::Generated),
            other => Err(DomainError::Validation(format!("unknown artifact source: {other}"))),
        }
    }
}

/// Indexed file owned by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    /// Owning tenant. Filled in on load; ignored on save.
    #[serde(default)]
    pub user_id: String,
    /// Session the artifact is scoped to, if any
    pub session_id: Option<String>,
    pub name: String,
    /// Storage path of the file contents
    pub path: String,
    pub source: ArtifactSource,
    pub source_agent_id: Option<String>,
    pub purpose: Option<String>,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: i64,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        path: impl Into<String>,
        source: ArtifactSource,
        content_type: impl Into<String>,
        size_bytes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: String::new(),
            session_id: None,
            name: name.into(),
            path: path.into(),
            source,
            source_agent_id: None,
            purpose: None,
            content_type: content_type.into(),
            size_bytes,
            checksum: None,
            tags: Vec::new(),
            metadata: serde_json::Map::new(),
            created_at: now,
            updated_at: now,
            last_accessed_at: None,
            access_count: 0,
            deleted_at: None,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn generated_by(mut self, agent_id: impl Into<String>) -> Self {
        self.source_agent_id = Some(agent_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.purpose = Some(purpose.into());
        self
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// Filters for listing artifacts. Unset fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFilter {
    pub session_id: Option<String>,
    pub source: Option<ArtifactSource>,
    /// Every listed tag must be present on the artifact
    #[serde(default)]
    pub tags: Vec<String>,
    pub content_type: Option<String>,
    pub min_size: Option<i64>,
    pub max_size: Option<i64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_deleted: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Aggregates over the calling tenant's artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStats {
    pub total_files: i64,
    pub total_size_bytes: i64,
    pub user_files: i64,
    pub generated_files: i64,
    pub deleted_files: i64,
}
