use crate::session::handle::SqlSession;
use crate::session::mode::SessionMode;
use crate::statements::StatementRegistry;
use crate::value::{BatchResult, Row, RowBounds, SqlValue};
use crate::Result;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Wrapper handed out for cached sessions. Every operation forwards to the
/// delegate unchanged except `close`, which rolls the delegate back instead:
/// the coordinator, not the caller, decides when the connection is actually
/// released, but dirty transaction state must still be discarded so it cannot
/// leak into the connection's next use.
pub struct NonClosingSession {
    delegate: Box<dyn SqlSession>,
}

impl NonClosingSession {
    pub fn new(delegate: Box<dyn SqlSession>) -> Self {
        NonClosingSession { delegate }
    }

    /// The wrapped session, for coordinator-driven teardown
    pub fn delegate(&self) -> &dyn SqlSession {
        self.delegate.as_ref()
    }
}

impl SqlSession for NonClosingSession {
    fn id(&self) -> Uuid {
        self.delegate.id()
    }

    fn mode(&self) -> SessionMode {
        self.delegate.mode()
    }

    fn select_one(&self, statement: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        self.delegate.select_one(statement, params)
    }

    fn select_list(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.delegate.select_list(statement, params)
    }

    fn select_page(
        &self,
        statement: &str,
        params: &[SqlValue],
        bounds: RowBounds,
    ) -> Result<Vec<Row>> {
        self.delegate.select_page(statement, params, bounds)
    }

    fn select_map(
        &self,
        statement: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> Result<HashMap<String, Row>> {
        self.delegate.select_map(statement, params, key_column)
    }

    fn select_each(
        &self,
        statement: &str,
        params: &[SqlValue],
        handler: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        self.delegate.select_each(statement, params, handler)
    }

    fn insert(&self, statement: &str, params: &[SqlValue]) -> Result<usize> {
        self.delegate.insert(statement, params)
    }

    fn update(&self, statement: &str, params: &[SqlValue]) -> Result<usize> {
        self.delegate.update(statement, params)
    }

    fn delete(&self, statement: &str, params: &[SqlValue]) -> Result<usize> {
        self.delegate.delete(statement, params)
    }

    fn commit(&self, force: bool) -> Result<()> {
        self.delegate.commit(force)
    }

    fn rollback(&self, force: bool) -> Result<()> {
        self.delegate.rollback(force)
    }

    fn flush_statements(&self) -> Result<Vec<BatchResult>> {
        self.delegate.flush_statements()
    }

    fn clear_cache(&self) -> Result<()> {
        self.delegate.clear_cache()
    }

    fn statements(&self) -> Arc<StatementRegistry> {
        self.delegate.statements()
    }

    fn connection(&self) -> Arc<Mutex<Connection>> {
        self.delegate.connection()
    }

    /// Overridden: rollback only, never a real close
    fn close(&self) -> Result<()> {
        self.delegate.rollback(false)
    }
}
