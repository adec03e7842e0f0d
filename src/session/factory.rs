use crate::config::CONFIG;
use crate::session::handle::{DbSession, SqlSession};
use crate::session::mode::SessionMode;
use crate::statements::StatementRegistry;
use crate::Result;
use rusqlite::{Connection, OpenFlags};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Opens a new session bound to the requested mode.
///
/// Connection acquisition failures are fatal and propagate unmodified; no
/// retry happens at this layer.
pub trait SessionFactory: Send + Sync {
    fn open_session(&self, mode: SessionMode) -> Result<Box<dyn SqlSession>>;
}

/// Factory producing sessions over SQLite connections
pub struct SqliteSessionFactory {
    db_path: String,
    registry: Arc<StatementRegistry>,
    journal_mode: String,
    synchronous: String,
    cache_size: i32,
    busy_timeout: Duration,
    statement_cache_size: usize,
}

impl SqliteSessionFactory {
    /// Create a factory with pragma settings taken from the global config
    pub fn new(db_path: impl Into<String>, registry: Arc<StatementRegistry>) -> Self {
        SqliteSessionFactory {
            db_path: db_path.into(),
            registry,
            journal_mode: CONFIG.pragma_journal_mode.clone(),
            synchronous: CONFIG.pragma_synchronous.clone(),
            cache_size: CONFIG.pragma_cache_size,
            busy_timeout: CONFIG.busy_timeout(),
            statement_cache_size: CONFIG.statement_cache_size,
        }
    }

    /// Create a factory pointed at the configured database path
    pub fn from_config(registry: Arc<StatementRegistry>) -> Self {
        Self::new(CONFIG.database_path(), registry)
    }

    /// In-memory sessions always use a rollback journal; WAL requires a file
    pub fn in_memory(registry: Arc<StatementRegistry>) -> Self {
        let mut factory = Self::new(":memory:", registry);
        factory.journal_mode = "MEMORY".to_string();
        factory
    }

    pub fn registry(&self) -> Arc<StatementRegistry> {
        self.registry.clone()
    }
}

impl SessionFactory for SqliteSessionFactory {
    fn open_session(&self, mode: SessionMode) -> Result<Box<dyn SqlSession>> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
            | OpenFlags::SQLITE_OPEN_URI;

        let conn = Connection::open_with_flags(&self.db_path, flags)?;

        // Set pragmas
        let pragma_sql = format!(
            "PRAGMA journal_mode = {};
             PRAGMA synchronous = {};
             PRAGMA cache_size = {};
             PRAGMA temp_store = MEMORY;",
            self.journal_mode, self.synchronous, self.cache_size
        );
        conn.execute_batch(&pragma_sql)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.set_prepared_statement_cache_capacity(self.statement_cache_size);

        let session = DbSession::new(conn, mode, self.registry.clone());
        debug!(session = %session.id(), mode = %mode, path = %self.db_path, "opened session");
        Ok(Box::new(session))
    }
}
