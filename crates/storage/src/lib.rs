//! Persistence for assistant chat sessions.

pub mod error;
pub mod sqlite;

use quill_chat::{ChatSession, SessionId};

pub use error::{StorageError, StorageResult};
pub use sqlite::SqliteChatStore;

/// Listing entry for one stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: SessionId,
    pub display_name: String,
    pub turn_count: u64,
    pub created_at_unix_seconds: u64,
    pub updated_at_unix_seconds: u64,
}

pub trait ChatSessionStore: Send + Sync {
    /// Inserts or overwrites a session together with all of its turns.
    fn save_session(&self, session: &ChatSession) -> StorageResult<SessionSummary>;
    fn load_session(&self, session_id: &SessionId) -> StorageResult<Option<ChatSession>>;
    /// Summaries ordered by most recent update first.
    fn list_sessions(&self) -> StorageResult<Vec<SessionSummary>>;
    fn delete_session(&self, session_id: &SessionId) -> StorageResult<()>;
}
