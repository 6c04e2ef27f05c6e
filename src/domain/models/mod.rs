pub mod admin;
pub mod artifact;
pub mod config;
pub mod error_record;
pub mod result;
pub mod session;

pub use admin::{PurgeReport, SessionPage, SessionSummary, SystemStats, TenantSessionCount};
pub use artifact::{Artifact, ArtifactFilter, ArtifactSource, ArtifactStats};
pub use config::{Config, DatabaseConfig, LoggingConfig, RetentionConfig};
pub use error_record::{ErrorFilter, StoredError};
pub use result::{QueryResult, ResultMetadata, TabularData};
pub use session::{
    MemorySnapshot, Message, MessageRole, Session, SessionStats, SessionWithMessages, ToolCall,
    ToolExecution,
};
