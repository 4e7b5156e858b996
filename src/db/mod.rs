//! Database module for Inbox Rules
//!
//! SQLite storage for ingested messages. The rule engine only ever reads
//! unread rows; ingestion is the single writer.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

// Connection pooling
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

/// Database error types
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Record not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Read side of the message store used by the rule engine
pub trait MessageStore: Send + Sync {
    /// Unread messages, oldest first
    fn list_unread(&self) -> DbResult<Vec<Message>>;
}

/// Database handle for thread-safe SQLite access
///
/// Opened by the caller before a run and dropped after it; nothing in the
/// crate keeps a process-wide connection.
#[derive(Clone)]
pub struct Database {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl Database {
    /// Open (or create) the store at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> DbResult<Self> {
        let manager = SqliteConnectionManager::file(db_path.as_ref());

        let pool = Pool::builder()
            .max_size(4)
            .connection_timeout(std::time::Duration::from_secs(10))
            .build(manager)?;

        let conn = pool.get()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
        "#,
        )?;
        Self::init_schema(&conn)?;
        drop(conn);

        log::debug!("Opened message store at {:?}", db_path.as_ref());

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    /// Create an in-memory store (for testing)
    ///
    /// Every SQLite in-memory connection is its own database, so the pool
    /// holds exactly one.
    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;

        let conn = pool.get()?;
        Self::init_schema(&conn)?;
        drop(conn);

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn init_schema(conn: &Connection) -> DbResult<()> {
        let schema = include_str!("schema.sql");
        conn.execute_batch(schema)?;
        Ok(())
    }

    /// Get a connection from the pool
    #[inline]
    pub fn get_conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // =========================================================================
    // MESSAGES
    // =========================================================================

    /// Insert a message, or refresh its read state if it is already stored
    pub fn upsert_message(&self, message: &NewMessage) -> DbResult<()> {
        let conn = self.get_conn()?;

        conn.execute(
            r#"
            INSERT INTO emails (id, sender, subject, received_at, message, is_read)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                is_read = excluded.is_read
            "#,
            params![
                message.id,
                message.sender,
                message.subject,
                message.received_at,
                message.body,
                message.is_read,
            ],
        )?;

        Ok(())
    }

    /// Upsert a batch in one transaction
    pub fn batch_upsert_messages(&self, messages: &[NewMessage]) -> DbResult<usize> {
        if messages.is_empty() {
            return Ok(0);
        }

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO emails (id, sender, subject, received_at, message, is_read)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(id) DO UPDATE SET
                    is_read = excluded.is_read
                "#,
            )?;

            for message in messages {
                stmt.execute(params![
                    message.id,
                    message.sender,
                    message.subject,
                    message.received_at,
                    message.body,
                    message.is_read,
                ])?;
            }
        }
        tx.commit()?;

        Ok(messages.len())
    }

    /// Get a stored message by provider id
    pub fn get_message(&self, id: &str) -> DbResult<Message> {
        let conn = self.get_conn()?;

        conn.query_row(
            "SELECT id, sender, subject, message, is_read FROM emails WHERE id = ?1",
            [id],
            Message::from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(id.to_string()),
            other => DbError::from(other),
        })
    }

    /// Number of stored messages that are still unread
    pub fn count_unread(&self) -> DbResult<i64> {
        let conn = self.get_conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM emails WHERE is_read = 0", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}

impl MessageStore for Database {
    fn list_unread(&self) -> DbResult<Vec<Message>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(
            r#"
            SELECT id, sender, subject, message, is_read
            FROM emails
            WHERE is_read = 0
            ORDER BY received_at ASC, id ASC
            "#,
        )?;

        let messages = stmt
            .query_map([], Message::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(messages)
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Stored message as seen by the rule engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub is_read: bool,
}

impl Message {
    /// Create Message from a `id, sender, subject, message, is_read` row
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Message {
            id: row.get(0)?,
            sender: row.get(1)?,
            subject: row.get(2)?,
            body: row.get(3)?,
            is_read: row.get(4)?,
        })
    }
}

/// Message produced by ingestion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: String,
    pub sender: String,
    pub subject: String,
    /// Provider receive time, milliseconds since the epoch as text
    pub received_at: String,
    pub body: String,
    pub is_read: bool,
}
