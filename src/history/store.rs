//! Chat history persistence with `SQLite`.

use super::{Author, Turn};
use crate::provider::{ChatMessage, InvalidMessage, Role, UnknownRole};
use rusqlite::{Connection, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Turns returned by [`HistoryStore::load`] unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

const SCHEMA_VERSION: i32 = 2;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl From<UnknownRole> for HistoryError {
    fn from(e: UnknownRole) -> Self {
        Self::InvalidData(e.to_string())
    }
}

impl From<InvalidMessage> for HistoryError {
    fn from(e: InvalidMessage) -> Self {
        Self::InvalidData(e.to_string())
    }
}

/// Append-only store of conversation turns keyed by channel.
///
/// Rows are never updated or deleted; trimming to a context window happens
/// on read. The connection is shared behind a mutex so one store can serve
/// every channel task.
pub struct HistoryStore {
    db: Mutex<Connection>,
    limit: usize,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Open or create a history store at the given path.
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                HistoryError::InvalidData(format!(
                    "Failed to create history directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let db = Connection::open(path)?;
        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(db)
    }

    /// Open a throwaway in-memory store.
    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self, HistoryError> {
        init_schema(&db)?;
        Ok(Self {
            db: Mutex::new(db),
            limit: DEFAULT_HISTORY_LIMIT,
        })
    }

    /// Change how many recent turns [`load`](Self::load) returns.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The most recent turns of a channel, oldest first.
    pub fn load(&self, channel_id: u64) -> Result<Vec<Turn>, HistoryError> {
        let channel = to_sql_id(channel_id)?;
        let limit = i64::try_from(self.limit).unwrap_or(i64::MAX);
        let db = self.conn();

        let mut stmt = db.prepare(
            r"
            SELECT id, user_id, user_name, message_role, message_content, created_at
            FROM chat_history
            WHERE channel_id = ?1
            ORDER BY id DESC
            LIMIT ?2
            ",
        )?;

        let rows = stmt.query_map(params![channel, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut turns = rows
            .map(|r| {
                let (sequence, author_id, author_name, role, content, created_at) = r?;
                let role: Role = role.parse()?;
                Ok(Turn {
                    sequence,
                    channel_id,
                    author_id,
                    author_name,
                    message: ChatMessage::new(role, content)?,
                    created_at,
                })
            })
            .collect::<Result<Vec<_>, HistoryError>>()?;

        turns.reverse();
        Ok(turns)
    }

    /// Append one turn.
    pub fn save(
        &self,
        channel_id: u64,
        author: Option<&Author>,
        message: &ChatMessage,
    ) -> Result<Turn, HistoryError> {
        let db = self.conn();
        insert_turn(&db, channel_id, author, message)
    }

    /// Append a user turn and its reply in one transaction, so a channel
    /// never holds a question without its answer.
    pub fn save_exchange(
        &self,
        channel_id: u64,
        author: Option<&Author>,
        user: &ChatMessage,
        assistant: &ChatMessage,
    ) -> Result<(Turn, Turn), HistoryError> {
        let mut db = self.conn();
        let tx = db.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let user_turn = insert_turn(&tx, channel_id, author, user)?;
        let assistant_turn = insert_turn(&tx, channel_id, author, assistant)?;
        tx.commit()?;
        Ok((user_turn, assistant_turn))
    }

    /// Number of stored turns in a channel.
    pub fn count(&self, channel_id: u64) -> Result<usize, HistoryError> {
        let channel = to_sql_id(channel_id)?;
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_history WHERE channel_id = ?1",
            params![channel],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|_| HistoryError::InvalidData(format!("count {count}")))
    }
}

fn init_schema(db: &Connection) -> Result<(), HistoryError> {
    let version: i32 = db.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    // v1: the table as first deployed, without timestamps
    if version < 1 {
        db.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS chat_history (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                channel_id      INTEGER NOT NULL,
                user_id         TEXT,
                user_name       TEXT,
                message_role    TEXT NOT NULL,
                message_content TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            ",
        )?;
    }

    // v1 -> v2: creation time and per-channel index
    if version < SCHEMA_VERSION {
        if !has_column(db, "chat_history", "created_at")? {
            db.execute_batch(
                "ALTER TABLE chat_history ADD COLUMN created_at INTEGER NOT NULL DEFAULT 0;",
            )?;
        }
        db.execute_batch(
            r"
            CREATE INDEX IF NOT EXISTS idx_chat_history_channel
                ON chat_history(channel_id, id);

            PRAGMA user_version = 2;
            ",
        )?;
    }

    Ok(())
}

fn has_column(db: &Connection, table: &str, column: &str) -> Result<bool, HistoryError> {
    let mut stmt = db.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names.iter().any(|name| name == column))
}

fn insert_turn(
    db: &Connection,
    channel_id: u64,
    author: Option<&Author>,
    message: &ChatMessage,
) -> Result<Turn, HistoryError> {
    let channel = to_sql_id(channel_id)?;
    let now = chrono::Utc::now().timestamp();
    let author_id = author.map(|a| a.id.as_str());
    let author_name = author.map(|a| a.name.as_str());

    db.execute(
        r"
        INSERT INTO chat_history
            (channel_id, user_id, user_name, message_role, message_content, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            channel,
            author_id,
            author_name,
            message.role().as_str(),
            message.content(),
            now
        ],
    )?;

    Ok(Turn {
        sequence: db.last_insert_rowid(),
        channel_id,
        author_id: author_id.map(str::to_string),
        author_name: author_name.map(str::to_string),
        message: message.clone(),
        created_at: now,
    })
}

/// Platform ids are u64 snowflakes; SQLite integers are signed.
fn to_sql_id(id: u64) -> Result<i64, HistoryError> {
    i64::try_from(id)
        .map_err(|_| HistoryError::InvalidData(format!("channel id out of range: {id}")))
}
