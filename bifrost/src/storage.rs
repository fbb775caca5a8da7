//! Durable scanner state: the scan position and the processing status of each block height.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, named_params};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockStatus {
    /// Handed to a consumer, but the consumer has not yet reported back.
    NotStarted,
    Success,
    Failed,
}

impl BlockStatus {
    fn to_sql(self) -> i64 {
        match self {
            BlockStatus::NotStarted => 0,
            BlockStatus::Success => 1,
            BlockStatus::Failed => 2,
        }
    }

    fn from_sql(value: i64) -> Result<Self> {
        match value {
            0 => Ok(BlockStatus::NotStarted),
            1 => Ok(BlockStatus::Success),
            2 => Ok(BlockStatus::Failed),
            other => Err(anyhow!("unknown block status {other}")),
        }
    }
}

pub trait ScannerStorage: Send + Sync {
    /// The last height that was handed off, or `None` if nothing has been persisted yet.
    fn get_scan_pos(&self) -> Result<Option<u64>>;

    fn set_scan_pos(&self, height: u64) -> Result<()>;

    fn set_block_status(&self, height: u64, status: BlockStatus) -> Result<()>;

    /// Heights that need to be offered to consumers again, in ascending order. With `failed_only` this is every
    /// `Failed` height, otherwise it is every height that has not been marked `Success`.
    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<u64>>;
}

/// [ScannerStorage] backed by a SQLite database.
#[derive(Debug)]
pub struct SqliteScannerStorage {
    conn: Mutex<Connection>,
}

impl SqliteScannerStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("unable to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("unable to open scanner db at {}", path.display()))?;
        debug!(path = %path.display(), "opened scanner db");
        Self::init(conn)
    }

    /// A database which lives only as long as this value. Everything is lost on restart.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS scan_pos (
                id INTEGER PRIMARY KEY CHECK (id = 0),
                height INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS block_status (
                height INTEGER PRIMARY KEY,
                status INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS block_status_status ON block_status (status);
            ",
        )?;
        Ok(SqliteScannerStorage {
            conn: Mutex::new(conn),
        })
    }
}

fn height_to_sql(height: u64) -> Result<i64> {
    i64::try_from(height).map_err(|_| anyhow!("height {height} is too large to store"))
}

fn height_from_sql(height: i64) -> Result<u64> {
    u64::try_from(height).map_err(|_| anyhow!("stored height {height} is negative"))
}

impl ScannerStorage for SqliteScannerStorage {
    fn get_scan_pos(&self) -> Result<Option<u64>> {
        let height: Option<i64> = self
            .conn
            .lock()
            .query_row("SELECT height FROM scan_pos WHERE id = 0", [], |row| {
                row.get(0)
            })
            .optional()?;
        height.map(height_from_sql).transpose()
    }

    fn set_scan_pos(&self, height: u64) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO scan_pos (id, height) VALUES (0, :height)
             ON CONFLICT (id) DO UPDATE SET height = :height",
            named_params! { ":height": height_to_sql(height)? },
        )?;
        Ok(())
    }

    fn set_block_status(&self, height: u64, status: BlockStatus) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO block_status (height, status) VALUES (:height, :status)
             ON CONFLICT (height) DO UPDATE SET status = :status",
            named_params! {
                ":height": height_to_sql(height)?,
                ":status": status.to_sql(),
            },
        )?;
        Ok(())
    }

    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<u64>> {
        let conn = self.conn.lock();
        let (query, status) = if failed_only {
            (
                "SELECT height FROM block_status WHERE status = ?1 ORDER BY height",
                BlockStatus::Failed,
            )
        } else {
            (
                "SELECT height FROM block_status WHERE status != ?1 ORDER BY height",
                BlockStatus::Success,
            )
        };
        let mut statement = conn.prepare_cached(query)?;
        let heights = statement
            .query_map([status.to_sql()], |row| row.get::<_, i64>(0))?
            .map(|height| height_from_sql(height?))
            .collect::<Result<Vec<_>>>()?;
        Ok(heights)
    }
}

/// Exposes each stored status, so tests can check what the scanner and observer recorded.
#[cfg(test)]
impl SqliteScannerStorage {
    pub(crate) fn block_status(&self, height: u64) -> Result<Option<BlockStatus>> {
        let status: Option<i64> = self
            .conn
            .lock()
            .query_row(
                "SELECT status FROM block_status WHERE height = ?1",
                [height_to_sql(height)?],
                |row| row.get(0),
            )
            .optional()?;
        status.map(BlockStatus::from_sql).transpose()
    }
}
