pub mod config;
pub mod logging;
pub mod session;
pub mod statements;
pub mod value;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbSessionError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Unknown statement id: {0}")]
    UnknownStatement(String),

    #[error("Statement '{statement}' returned {count} rows, expected at most one")]
    TooManyRows { statement: String, count: usize },

    #[error("Session is closed")]
    SessionClosed,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, DbSessionError>;

pub use session::{
    DbSession, DbSessions, NonClosingSession, ScopedSession, SessionContext, SessionFactory,
    SessionMode, SharedSession, SqlSession, SqliteSessionFactory,
};
pub use statements::StatementRegistry;
pub use value::{BatchResult, Row, RowBounds, SqlValue};
