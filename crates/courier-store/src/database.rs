//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`]. Against a live
//! host store it is always opened read-only: the host application is the
//! single writer and this process must never contend for its write lock.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};

use crate::error::Result;
use crate::schema;

/// How long a query waits on the host's write lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .finish()
    }
}

impl Database {
    /// Open an existing store read-only.
    ///
    /// Each query runs in its own implicit read transaction, so rows the
    /// host commits between queries become visible without reopening.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        tracing::info!(path = %path.display(), "opened message store (read-only)");

        Ok(Self { conn })
    }

    /// Open (or create) a writable store at `path` with the schema installed.
    ///
    /// Used for fixtures and local development, never for the host's store.
    pub fn create_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        schema::install(&conn)?;
        Ok(Self { conn })
    }

    /// A private in-memory store with the schema installed.
    pub fn create_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::install(&conn)?;
        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }
}
