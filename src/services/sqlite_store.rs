//! SQLite persistence for daily records and the remote control queue.
//!
//! Two tables:
//! - `stock_data` holds one row per (symbol, date)
//! - `sync_control` holds remote commands with a processed flag

use crate::error::Result;
use crate::services::store::{CommandChannel, RecordStore};
use crate::types::{CommandAction, DataRecord, RemoteCommand};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// SQLite store backing the sync engine.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    crate::error::AppError::Persistence(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("SQLite connection mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS stock_data (
                symbol TEXT NOT NULL,
                date TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                adjusted_close REAL NOT NULL,
                volume INTEGER NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (symbol, date)
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_control (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL,
                payload TEXT,
                processed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                processed_at TEXT,
                error TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sync_control_pending
             ON sync_control(processed, created_at)",
            [],
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Record Methods ==========

    /// Rows stored for a symbol.
    pub fn record_count(&self, symbol: &str) -> Result<usize> {
        let conn = self.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM stock_data WHERE symbol = ?1",
            params![symbol.to_uppercase()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ========== Control Methods ==========

    /// Queue a remote command. Returns its id.
    pub fn enqueue_command(
        &self,
        action: &CommandAction,
        payload: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO sync_control (action, payload, processed, created_at)
             VALUES (?1, ?2, 0, ?3)",
            params![
                action.as_str(),
                payload.map(|p| p.to_string()),
                Utc::now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Look up a command by id, with the error recorded when it was processed.
    pub fn get_command(&self, id: i64) -> Result<Option<(RemoteCommand, Option<String>)>> {
        let conn = self.lock();
        let found = conn
            .query_row(
                "SELECT id, action, payload, processed, created_at, error
                 FROM sync_control WHERE id = ?1",
                params![id],
                |row| Ok((row_to_command(row)?, row.get::<_, Option<String>>(5)?)),
            )
            .optional()?;
        Ok(found)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<DataRecord> {
    Ok(DataRecord {
        symbol: row.get(0)?,
        date: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        adjusted_close: row.get(6)?,
        volume: row.get::<_, i64>(7)?.max(0) as u64,
    })
}

fn row_to_command(row: &Row<'_>) -> rusqlite::Result<RemoteCommand> {
    let action: String = row.get(1)?;
    let payload: Option<String> = row.get(2)?;
    let created_at: DateTime<Utc> = row.get(4)?;
    Ok(RemoteCommand {
        id: row.get(0)?,
        action: CommandAction::parse(&action),
        // A payload that is not JSON is kept as a plain string.
        payload: payload.map(|p| {
            serde_json::from_str(&p).unwrap_or(serde_json::Value::String(p))
        }),
        processed: row.get::<_, i64>(3)? != 0,
        created_at,
    })
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn read_records(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DataRecord>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, date, open, high, low, close, adjusted_close, volume
             FROM stock_data
             WHERE symbol = ?1 AND date >= ?2 AND date <= ?3
             ORDER BY date DESC",
        )?;
        let records = stmt
            .query_map(params![symbol.to_uppercase(), from, to], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn upsert_records(&self, records: &[DataRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let mut written = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO stock_data
                 (symbol, date, open, high, low, close, adjusted_close, volume, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for record in records {
                written += stmt.execute(params![
                    record.symbol.to_uppercase(),
                    record.date,
                    record.open,
                    record.high,
                    record.low,
                    record.close,
                    record.adjusted_close,
                    record.volume as i64,
                    now,
                ])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} records", written);
        Ok(written)
    }

    async fn read_oldest_record(&self, symbol: &str) -> Result<Option<DataRecord>> {
        let conn = self.lock();
        let record = conn
            .query_row(
                "SELECT symbol, date, open, high, low, close, adjusted_close, volume
                 FROM stock_data WHERE symbol = ?1
                 ORDER BY date ASC LIMIT 1",
                params![symbol.to_uppercase()],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

#[async_trait]
impl CommandChannel for SqliteStore {
    async fn fetch_unprocessed_commands(&self, limit: usize) -> Result<Vec<RemoteCommand>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, action, payload, processed, created_at
             FROM sync_control
             WHERE processed = 0
             ORDER BY created_at ASC, id ASC
             LIMIT ?1",
        )?;
        let commands = stmt
            .query_map(params![limit as i64], row_to_command)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(commands)
    }

    async fn mark_processed(&self, id: i64, error: Option<String>) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            "UPDATE sync_control SET processed = 1, processed_at = ?2, error = ?3
             WHERE id = ?1",
            params![id, Utc::now(), error],
        )?;
        Ok(())
    }
}
