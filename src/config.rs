use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "dbsessions")]
#[command(about = "Database session lifecycle layer: cached per-request SQLite sessions", long_about = None)]
pub struct Config {
    // Basic configuration
    #[arg(long, default_value = "sqlite.db", env = "DBSESSIONS_DATABASE")]
    pub database: String,

    #[arg(long, env = "DBSESSIONS_IN_MEMORY", help = "Use an in-memory SQLite database (for testing only)")]
    pub in_memory: bool,

    #[arg(long, default_value = "info", env = "DBSESSIONS_LOG_LEVEL")]
    pub log_level: String,

    // Session configuration
    #[arg(long, default_value = "64", env = "DBSESSIONS_STATEMENT_CACHE_SIZE", help = "Maximum number of prepared statements cached per connection")]
    pub statement_cache_size: usize,

    #[arg(long, default_value = "5000", env = "DBSESSIONS_BUSY_TIMEOUT_MS", help = "SQLite busy timeout in milliseconds")]
    pub busy_timeout_ms: u64,

    // SQLite PRAGMA settings
    #[arg(long, default_value = "WAL", env = "DBSESSIONS_JOURNAL_MODE", help = "SQLite journal mode (WAL, DELETE, TRUNCATE, etc.)")]
    pub pragma_journal_mode: String,

    #[arg(long, default_value = "NORMAL", env = "DBSESSIONS_SYNCHRONOUS", help = "SQLite synchronous mode (NORMAL, FULL, OFF)")]
    pub pragma_synchronous: String,

    #[arg(long, default_value = "-64000", env = "DBSESSIONS_CACHE_SIZE", help = "SQLite page cache size in KB (negative for KB, positive for pages)")]
    pub pragma_cache_size: i32,
}

impl Config {
    /// Get a configuration instance with all values resolved from environment
    /// variables. The embedding service owns the process CLI surface, so argv
    /// is deliberately not consulted.
    pub fn load() -> Self {
        Config::parse_from(std::iter::once("dbsessions"))
    }

    /// Get the busy timeout as Duration
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Resolve the database path, honoring the in-memory flag
    pub fn database_path(&self) -> String {
        if self.in_memory {
            ":memory:".to_string()
        } else {
            self.database.clone()
        }
    }
}

// Global configuration instance
lazy_static::lazy_static! {
    pub static ref CONFIG: Config = Config::load();
}
