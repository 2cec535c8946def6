use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use quill_chat::{ChatSession, ContextItem, Role, SessionId, Turn, TurnStatus};
use snafu::{ResultExt, ensure};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, FromRow, SqliteConnection};

use super::error::{
    CreateSqliteDirectorySnafu, InvalidIdSnafu, InvariantViolationSnafu, NotFoundSnafu,
    SerializeSnafu, SqliteConnectOptionsSnafu, SqliteConnectSnafu, SqliteMigrateSnafu,
    SqlitePragmaSnafu, SqliteQuerySnafu, SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu,
    StorageError, StorageResult,
};
use super::{ChatSessionStore, SessionSummary};

/// SQLite-backed session store.
///
/// Only the database URL is kept; every call opens its own connection on a
/// short-lived worker thread.
#[derive(Debug, Clone)]
pub struct SqliteChatStore {
    database_url: String,
}

impl SqliteChatStore {
    /// Opens (creating if needed) the database and applies pending migrations.
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;
        pool.close().await;

        tracing::debug!(database_url = %database_url, "sqlite chat store ready");
        Ok(Self { database_url })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store methods are sync; a private current-thread runtime keeps them
        // callable from inside another runtime.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl ChatSessionStore for SqliteChatStore {
    fn save_session(&self, session: &ChatSession) -> StorageResult<SessionSummary> {
        let session_id = validate_session_id(session.id(), "session-save-validate-id")?;
        let display_name = session.display_name();
        let turns = session
            .turns()
            .iter()
            .map(|turn| NewTurnRow::from_turn(turn, "session-save-encode-context"))
            .collect::<StorageResult<Vec<_>>>()?;
        let turn_count = turns.len() as u64;
        let database_url = self.database_url.clone();

        let (created_at, updated_at) = self.run_db_call("session-save", {
            let session_id = session_id.clone();
            let display_name = display_name.clone();
            async move {
                let mut connection =
                    connect_store_connection(&database_url, "session-save-connect").await?;
                let mut tx = connection.begin().await.context(SqliteQuerySnafu {
                    stage: "session-save-begin",
                })?;
                let now = unix_timestamp_millis();

                sqlx::query(
                    "INSERT INTO chat_sessions (id, display_name, created_at, updated_at) VALUES (?, ?, ?, ?) \
                     ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name, updated_at = excluded.updated_at",
                )
                .bind(&session_id)
                .bind(&display_name)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context(SqliteQuerySnafu {
                    stage: "session-save-upsert",
                })?;

                let created_at: i64 =
                    sqlx::query_scalar("SELECT created_at FROM chat_sessions WHERE id = ?")
                        .bind(&session_id)
                        .fetch_one(&mut *tx)
                        .await
                        .context(SqliteQuerySnafu {
                            stage: "session-save-created-at",
                        })?;

                // Turns are rewritten wholesale so a re-save never leaves stale rows.
                sqlx::query("DELETE FROM chat_turns WHERE session_id = ?")
                    .bind(&session_id)
                    .execute(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "session-save-clear-turns",
                    })?;

                for (seq, turn) in turns.into_iter().enumerate() {
                    sqlx::query(
                        "INSERT INTO chat_turns (session_id, seq, role, content, visible_content, status, context_json) VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&session_id)
                    .bind(seq as i64)
                    .bind(turn.role)
                    .bind(turn.content)
                    .bind(turn.visible_content)
                    .bind(turn.status)
                    .bind(turn.context_json)
                    .execute(&mut *tx)
                    .await
                    .context(SqliteQuerySnafu {
                        stage: "session-save-insert-turn",
                    })?;
                }

                tx.commit().await.context(SqliteQuerySnafu {
                    stage: "session-save-commit",
                })?;

                Ok((created_at, now))
            }
        })?;

        tracing::debug!(session_id = %session_id, turn_count, "saved chat session");
        Ok(SessionSummary {
            id: SessionId::new(session_id),
            display_name,
            turn_count,
            created_at_unix_seconds: millis_to_seconds(created_at, "session-save-created-at")?,
            updated_at_unix_seconds: millis_to_seconds(updated_at, "session-save-updated-at")?,
        })
    }

    fn load_session(&self, session_id: &SessionId) -> StorageResult<Option<ChatSession>> {
        let session_id = validate_session_id(session_id, "session-load-validate-id")?;
        let database_url = self.database_url.clone();

        self.run_db_call("session-load", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-load-connect").await?;
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM chat_sessions WHERE id = ?",
            )
            .bind(&session_id)
            .fetch_one(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-load-exists",
            })?;
            if exists == 0 {
                return Ok(None);
            }

            let rows = sqlx::query_as::<_, TurnRow>(
                "SELECT role, content, visible_content, status, context_json FROM chat_turns WHERE session_id = ? ORDER BY seq ASC",
            )
            .bind(&session_id)
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-load-turns",
            })?;

            let turns = rows
                .into_iter()
                .map(turn_row_to_turn)
                .collect::<StorageResult<Vec<_>>>()?;
            Ok(Some(ChatSession::from_turns(SessionId::new(session_id), turns)))
        })
    }

    fn list_sessions(&self) -> StorageResult<Vec<SessionSummary>> {
        let database_url = self.database_url.clone();
        self.run_db_call("session-list", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-list-connect").await?;
            let rows = sqlx::query_as::<_, SessionRow>(
                "SELECT s.id, s.display_name, s.created_at, s.updated_at, COUNT(t.seq) AS turn_count \
                 FROM chat_sessions s LEFT JOIN chat_turns t ON t.session_id = s.id \
                 GROUP BY s.id ORDER BY s.updated_at DESC, s.id DESC",
            )
            .fetch_all(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "session-list-query",
            })?;

            rows.into_iter().map(session_row_to_summary).collect()
        })
    }

    fn delete_session(&self, session_id: &SessionId) -> StorageResult<()> {
        let session_id = validate_session_id(session_id, "session-delete-validate-id")?;
        let database_url = self.database_url.clone();

        self.run_db_call("session-delete", async move {
            let mut connection =
                connect_store_connection(&database_url, "session-delete-connect").await?;
            let result = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
                .bind(&session_id)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "session-delete-query",
                })?;

            ensure!(
                result.rows_affected() > 0,
                NotFoundSnafu {
                    stage: "session-delete-query",
                    entity: "chat_session",
                    id: session_id,
                }
            );
            Ok(())
        })
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    display_name: String,
    created_at: i64,
    updated_at: i64,
    turn_count: i64,
}

#[derive(Debug, FromRow)]
struct TurnRow {
    role: String,
    content: String,
    visible_content: Option<String>,
    status: String,
    context_json: String,
}

#[derive(Debug)]
struct NewTurnRow {
    role: &'static str,
    content: String,
    visible_content: Option<String>,
    status: &'static str,
    context_json: String,
}

impl NewTurnRow {
    fn from_turn(turn: &Turn, stage: &'static str) -> StorageResult<Self> {
        Ok(Self {
            role: turn.role.as_str(),
            content: turn.content.clone(),
            visible_content: turn.visible_content.clone(),
            status: turn.status.as_str(),
            context_json: serde_json::to_string(&turn.context).context(SerializeSnafu { stage })?,
        })
    }
}

fn session_row_to_summary(row: SessionRow) -> StorageResult<SessionSummary> {
    Ok(SessionSummary {
        id: SessionId::new(row.id),
        display_name: row.display_name,
        turn_count: i64_to_u64(row.turn_count, "session-row-turn-count")?,
        created_at_unix_seconds: millis_to_seconds(row.created_at, "session-row-created-at")?,
        updated_at_unix_seconds: millis_to_seconds(row.updated_at, "session-row-updated-at")?,
    })
}

fn turn_row_to_turn(row: TurnRow) -> StorageResult<Turn> {
    let context = serde_json::from_str::<Vec<ContextItem>>(&row.context_json).map_err(|source| {
        StorageError::InvariantViolation {
            stage: "turn-row-context",
            details: format!("turn has unreadable context: {source}"),
        }
    })?;

    Ok(Turn {
        role: role_from_sql(&row.role)?,
        content: row.content,
        visible_content: row.visible_content,
        status: status_from_sql(&row.status)?,
        context,
    })
}

fn role_from_sql(raw: &str) -> StorageResult<Role> {
    match raw {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        _ => InvariantViolationSnafu {
            stage: "turn-row-role",
            details: format!("unknown turn role '{raw}'"),
        }
        .fail(),
    }
}

fn status_from_sql(raw: &str) -> StorageResult<TurnStatus> {
    match raw {
        "pending" => Ok(TurnStatus::Pending),
        "success" => Ok(TurnStatus::Success),
        "error" => Ok(TurnStatus::Error),
        _ => InvariantViolationSnafu {
            stage: "turn-row-status",
            details: format!("unknown turn status '{raw}'"),
        }
        .fail(),
    }
}

/// Ids are stored exactly as given; blank or padded ids are refused.
fn validate_session_id(session_id: &SessionId, stage: &'static str) -> StorageResult<String> {
    let raw = session_id.as_str();
    ensure!(
        !raw.trim().is_empty() && raw.trim() == raw,
        InvalidIdSnafu { stage, raw }
    );
    Ok(raw.to_string())
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-foreign-keys",
            pragma: "foreign_keys",
        })?;
    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

fn unix_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn millis_to_seconds(value: i64, stage: &'static str) -> StorageResult<u64> {
    i64_to_u64(value, stage).map(|millis| millis / 1_000)
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use quill_chat::FragmentStatus;
    use tempfile::TempDir;

    use super::*;

    async fn open_store() -> (TempDir, SqliteChatStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("chats.sqlite3");
        let store = SqliteChatStore::open(&path.display().to_string())
            .await
            .expect("store opens");
        (dir, store)
    }

    fn answered_session(id: &str, prompt: &str, answer: &str) -> ChatSession {
        ChatSession::new(SessionId::new(id))
            .with_user_turn(prompt)
            .fold(answer, FragmentStatus::Success)
            .expect("non-empty answer folds")
    }

    #[tokio::test]
    async fn saved_session_loads_back_with_every_turn_field() {
        let (_dir, store) = open_store().await;
        let context = vec![ContextItem {
            source: "notes.md".to_string(),
            excerpt: "The meeting moved to Friday.".to_string(),
        }];
        let session = ChatSession::from_turns(
            SessionId::new("s1"),
            vec![
                Turn::user("Simplify this")
                    .with_visible_content("Simplify")
                    .with_context(context),
                Turn::assistant("Short text.", TurnStatus::Success),
                Turn::user("again"),
                Turn::assistant("provider offline", TurnStatus::Error),
            ],
        );

        let summary = store.save_session(&session).expect("session saves");
        let loaded = store
            .load_session(&SessionId::new("s1"))
            .expect("load succeeds")
            .expect("session exists");

        assert_eq!(loaded, session);
        assert_eq!(summary.turn_count, 4);
        assert_eq!(summary.display_name, session.display_name());
    }

    #[tokio::test]
    async fn resave_replaces_turns_and_keeps_created_at() {
        let (_dir, store) = open_store().await;
        let first = answered_session("s1", "first prompt", "first answer");
        let created = store.save_session(&first).expect("first save");

        let second = first
            .with_user_turn("follow up")
            .fold("second answer", FragmentStatus::Success)
            .expect("folds");
        let resaved = store.save_session(&second).expect("second save");

        let loaded = store
            .load_session(second.id())
            .expect("load succeeds")
            .expect("session exists");
        assert_eq!(loaded.turns().len(), 4);
        assert_eq!(resaved.created_at_unix_seconds, created.created_at_unix_seconds);
        assert_eq!(store.list_sessions().expect("list").len(), 1);
    }

    #[tokio::test]
    async fn list_orders_by_latest_update() {
        let (_dir, store) = open_store().await;
        let older = answered_session("a", "older prompt", "answer");
        let newer = answered_session("b", "newer prompt", "answer");

        store.save_session(&newer).expect("save b");
        std::thread::sleep(Duration::from_millis(5));
        store.save_session(&older).expect("save a");

        let ids = store
            .list_sessions()
            .expect("list")
            .into_iter()
            .map(|summary| summary.id)
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![SessionId::new("a"), SessionId::new("b")]);
    }

    #[tokio::test]
    async fn delete_removes_session_and_reports_missing_ids() {
        let (_dir, store) = open_store().await;
        let session = answered_session("s1", "prompt", "answer");
        store.save_session(&session).expect("save");

        store.delete_session(session.id()).expect("delete");

        assert_eq!(store.load_session(session.id()).expect("load"), None);
        assert!(matches!(
            store.delete_session(session.id()),
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn blank_session_id_is_rejected() {
        let (_dir, store) = open_store().await;
        let session = ChatSession::new(SessionId::new("  ")).with_user_turn("prompt");

        assert!(matches!(
            store.save_session(&session),
            Err(StorageError::InvalidId { .. })
        ));
    }

    #[tokio::test]
    async fn padded_session_id_is_rejected_not_trimmed() {
        let (_dir, store) = open_store().await;
        let padded = ChatSession::new(SessionId::new(" s1 ")).with_user_turn("prompt");

        assert!(matches!(
            store.save_session(&padded),
            Err(StorageError::InvalidId { ref raw, .. }) if raw == " s1 "
        ));
        assert!(matches!(
            store.load_session(&SessionId::new("s1 ")),
            Err(StorageError::InvalidId { .. })
        ));
        assert!(matches!(
            store.delete_session(&SessionId::new(" s1")),
            Err(StorageError::InvalidId { .. })
        ));
        assert!(store.list_sessions().expect("list").is_empty());
    }

    #[test]
    fn database_locations_normalize_to_sqlite_urls() {
        assert_eq!(normalize_database_url(":memory:"), "sqlite::memory:");
        assert_eq!(normalize_database_url("sqlite://x.db"), "sqlite://x.db");
        assert_eq!(normalize_database_url("/tmp/x.db"), "sqlite:///tmp/x.db");
    }
}
