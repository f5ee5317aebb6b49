//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Documents are written with
//! `INSERT ... ON CONFLICT DO UPDATE`; when a concurrent writer trips a
//! uniqueness constraint anyway, the write is retried as a plain `UPDATE`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::model::{Agent, Conversation, LogRecord, Session, Turn};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Upsert, falling back to `update_sql` on a uniqueness race.
    ///
    /// Both statements must bind the same positional parameters, with the
    /// document key at `?1`.
    async fn upsert_or_update(
        &self,
        op: &str,
        upsert_sql: &str,
        update_sql: &str,
        values: Vec<Value>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        match conn.execute(upsert_sql, values.clone()).await {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                warn!(op, error = %err, "Duplicate key on upsert, falling back to update");
                let updated = conn
                    .execute(update_sql, values)
                    .await
                    .map_err(|e| DatabaseError::Query(format!("{op} fallback: {e}")))?;
                if updated == 0 {
                    return Err(DatabaseError::Constraint(format!("{op}: {err}")));
                }
                Ok(())
            }
            Err(err) => Err(DatabaseError::Query(format!("{op}: {err}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn is_unique_violation(err: &libsql::Error) -> bool {
    err.to_string().contains("UNIQUE constraint failed")
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    // Try RFC 3339 first (our canonical write format)
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> Value {
    match dt {
        Some(dt) => Value::Text(dt.to_rfc3339()),
        None => Value::Null,
    }
}

fn text(s: impl Into<String>) -> Value {
    Value::Text(s.into())
}

/// Map a libsql Row to a Session.
///
/// Column order matches SESSION_COLUMNS.
fn row_to_session(row: &libsql::Row) -> Result<Session, libsql::Error> {
    Ok(Session {
        session_id: row.get(0)?,
        agent_id: row.get(1)?,
        agent_name: row.get(2)?,
        started_at: parse_optional_datetime(&row.get::<String>(3).ok()),
        ended_at: parse_optional_datetime(&row.get::<String>(4).ok()),
        status: row.get::<String>(5).ok(),
    })
}

/// Map a libsql Row to a Conversation.
///
/// Column order matches CONVERSATION_COLUMNS.
fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));

    let turns_json: String = row.get(3).map_err(read)?;
    let turns: Vec<Turn> = serde_json::from_str(&turns_json)
        .map_err(|e| DatabaseError::Serialization(format!("conversation turns: {e}")))?;
    let total_turns: i64 = row.get(4).map_err(read)?;
    let first: String = row.get(5).map_err(read)?;
    let last: String = row.get(6).map_err(read)?;

    Ok(Conversation {
        session_id: row.get(0).map_err(read)?,
        agent_id: row.get(1).map_err(read)?,
        agent_name: row.get(2).map_err(read)?,
        turns,
        total_turns: total_turns as u32,
        first_message_at: parse_datetime(&first),
        last_message_at: parse_datetime(&last),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const SESSION_COLUMNS: &str = "session_id, agent_id, agent_name, started_at, ended_at, status";

const CONVERSATION_COLUMNS: &str =
    "session_id, agent_id, agent_name, turns, total_turns, first_message_at, last_message_at";

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Agents & sessions ───────────────────────────────────────────

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.upsert_or_update(
            "upsert_agent",
            "INSERT INTO agents (agent_id, name, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (agent_id) DO UPDATE SET
                name = excluded.name,
                updated_at = excluded.updated_at",
            "UPDATE agents SET name = ?2, updated_at = ?3 WHERE agent_id = ?1",
            vec![text(&agent.agent_id), text(&agent.name), text(now)],
        )
        .await?;

        debug!(agent_id = %agent.agent_id, name = %agent.name, "Agent upserted");
        Ok(())
    }

    async fn upsert_session(&self, session: &Session) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.upsert_or_update(
            "upsert_session",
            "INSERT INTO sessions (session_id, agent_id, agent_name, started_at, ended_at, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (session_id) DO UPDATE SET
                agent_id = excluded.agent_id,
                agent_name = excluded.agent_name,
                started_at = COALESCE(excluded.started_at, sessions.started_at),
                ended_at = COALESCE(excluded.ended_at, sessions.ended_at),
                status = COALESCE(excluded.status, sessions.status),
                updated_at = excluded.updated_at",
            "UPDATE sessions SET
                agent_id = ?2,
                agent_name = ?3,
                started_at = COALESCE(?4, started_at),
                ended_at = COALESCE(?5, ended_at),
                status = COALESCE(?6, status),
                updated_at = ?7
             WHERE session_id = ?1",
            vec![
                text(&session.session_id),
                text(&session.agent_id),
                text(&session.agent_name),
                opt_datetime(session.started_at),
                opt_datetime(session.ended_at),
                opt_text(session.status.as_deref()),
                text(now),
            ],
        )
        .await
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let session = row_to_session(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(session))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_session: {e}"))),
        }
    }

    // ── Conversations ───────────────────────────────────────────────

    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), DatabaseError> {
        let turns = serde_json::to_string(&conversation.turns)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.upsert_or_update(
            "upsert_conversation",
            "INSERT INTO conversations (session_id, agent_id, agent_name, turns, total_turns,
                first_message_at, last_message_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (session_id) DO UPDATE SET
                agent_id = excluded.agent_id,
                agent_name = excluded.agent_name,
                turns = excluded.turns,
                total_turns = excluded.total_turns,
                first_message_at = excluded.first_message_at,
                last_message_at = excluded.last_message_at,
                updated_at = excluded.updated_at",
            "UPDATE conversations SET
                agent_id = ?2,
                agent_name = ?3,
                turns = ?4,
                total_turns = ?5,
                first_message_at = ?6,
                last_message_at = ?7,
                updated_at = ?8
             WHERE session_id = ?1",
            vec![
                text(&conversation.session_id),
                text(&conversation.agent_id),
                text(&conversation.agent_name),
                text(turns),
                Value::Integer(i64::from(conversation.total_turns)),
                text(conversation.first_message_at.to_rfc3339()),
                text(conversation.last_message_at.to_rfc3339()),
                text(now),
            ],
        )
        .await?;

        debug!(
            session_id = %conversation.session_id,
            total_turns = conversation.total_turns,
            "Conversation upserted"
        );
        Ok(())
    }

    async fn find_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE session_id = ?1"),
                params![session_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_conversation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("find_conversation: {e}"))),
        }
    }

    // ── Raw logs ────────────────────────────────────────────────────

    async fn upsert_log(&self, record: &LogRecord) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(&record.raw)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        self.upsert_or_update(
            "upsert_log",
            "INSERT INTO raw_logs (log_key, session_id, agent_name, message, timestamp, raw, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (log_key) DO UPDATE SET
                session_id = COALESCE(excluded.session_id, raw_logs.session_id),
                agent_name = excluded.agent_name,
                message = excluded.message,
                timestamp = excluded.timestamp,
                raw = excluded.raw,
                updated_at = excluded.updated_at",
            "UPDATE raw_logs SET
                session_id = COALESCE(?2, session_id),
                agent_name = ?3,
                message = ?4,
                timestamp = ?5,
                raw = ?6,
                updated_at = ?7
             WHERE log_key = ?1",
            vec![
                text(&record.log_key),
                opt_text(record.session_id.as_deref()),
                text(&record.agent_name),
                text(&record.message),
                text(record.timestamp.to_rfc3339()),
                text(raw),
                text(now),
            ],
        )
        .await
    }
}
