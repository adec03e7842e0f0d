// Module for session management
pub mod coordinator;
pub mod factory;
pub mod handle;
pub mod mode;
pub mod non_closing;

pub use coordinator::{DbSessions, ScopedSession, SessionContext, SharedSession};
pub use factory::{SessionFactory, SqliteSessionFactory};
pub use handle::{DbSession, SqlSession};
pub use mode::SessionMode;
pub use non_closing::NonClosingSession;
