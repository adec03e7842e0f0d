use crate::session::mode::SessionMode;
use crate::statements::StatementRegistry;
use crate::value::{BatchResult, Row, RowBounds, SqlValue};
use crate::{DbSessionError, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, params_from_iter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// The full session interface: parameterized reads, writes by statement id,
/// transaction control, batch flushing, and registry/connection access.
///
/// Handles are intended for strictly sequential use by their owning thread.
pub trait SqlSession: Send + Sync {
    fn id(&self) -> Uuid;

    fn mode(&self) -> SessionMode;

    /// Single-row read. Err if the statement matches more than one row.
    fn select_one(&self, statement: &str, params: &[SqlValue]) -> Result<Option<Row>>;

    /// Multi-row read
    fn select_list(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Multi-row read with offset/limit applied in memory
    fn select_page(
        &self,
        statement: &str,
        params: &[SqlValue],
        bounds: RowBounds,
    ) -> Result<Vec<Row>>;

    /// Multi-row read shaped as a map keyed by one column's value.
    /// Rows whose key column is NULL are skipped.
    fn select_map(
        &self,
        statement: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> Result<HashMap<String, Row>>;

    /// Streaming read: the handler is invoked once per row, in select order.
    /// An Err from the handler aborts the read and propagates.
    fn select_each(
        &self,
        statement: &str,
        params: &[SqlValue],
        handler: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()>;

    /// Returns the number of affected rows (0 when queued on a batched session)
    fn insert(&self, statement: &str, params: &[SqlValue]) -> Result<usize>;

    fn update(&self, statement: &str, params: &[SqlValue]) -> Result<usize>;

    fn delete(&self, statement: &str, params: &[SqlValue]) -> Result<usize>;

    /// Commit the open transaction. Non-forced commits are a no-op on a
    /// clean session; batched sessions flush their queue first.
    fn commit(&self, force: bool) -> Result<()>;

    /// Roll back the open transaction and discard any queued batch writes.
    /// Non-forced rollbacks are a no-op on a clean session.
    fn rollback(&self, force: bool) -> Result<()>;

    /// Execute all queued batch writes, returning one result per run of
    /// consecutive identical statement ids. Empty on immediate sessions.
    fn flush_statements(&self) -> Result<Vec<BatchResult>>;

    /// Drop the connection's prepared-statement cache
    fn clear_cache(&self) -> Result<()>;

    /// Access to the shared statement registry
    fn statements(&self) -> Arc<StatementRegistry>;

    /// Raw connection access
    fn connection(&self) -> Arc<Mutex<Connection>>;

    /// Roll back any open transaction and mark the handle closed. Every
    /// subsequent operation fails with `SessionClosed`. Idempotent.
    fn close(&self) -> Result<()>;
}

struct SessionState {
    in_transaction: bool,
    dirty: bool,
    closed: bool,
    pending: Vec<PendingWrite>,
}

struct PendingWrite {
    statement: String,
    sql: String,
    params: Vec<SqlValue>,
}

/// Concrete session over a SQLite connection.
///
/// A deferred transaction is opened lazily before the first write and closed
/// by commit/rollback/close. Lock order is always state before connection.
pub struct DbSession {
    id: Uuid,
    mode: SessionMode,
    conn: Arc<Mutex<Connection>>,
    registry: Arc<StatementRegistry>,
    state: Mutex<SessionState>,
}

impl DbSession {
    pub fn new(conn: Connection, mode: SessionMode, registry: Arc<StatementRegistry>) -> Self {
        DbSession {
            id: Uuid::new_v4(),
            mode,
            conn: Arc::new(Mutex::new(conn)),
            registry,
            state: Mutex::new(SessionState {
                in_transaction: false,
                dirty: false,
                closed: false,
                pending: Vec::new(),
            }),
        }
    }

    fn begin_if_needed(&self, state: &mut SessionState) -> Result<()> {
        if !state.in_transaction {
            self.conn.lock().execute_batch("BEGIN DEFERRED")?;
            state.in_transaction = true;
            debug!(session = %self.id, mode = %self.mode, "opened deferred transaction");
        }
        Ok(())
    }

    /// Batched sessions flush their queue before any read so queued writes
    /// are visible to the query.
    fn prepare_read(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DbSessionError::SessionClosed);
        }
        if self.mode.is_batched() && !state.pending.is_empty() {
            self.flush_pending(&mut state)?;
        }
        Ok(())
    }

    fn flush_pending(&self, state: &mut SessionState) -> Result<Vec<BatchResult>> {
        if state.pending.is_empty() {
            return Ok(Vec::new());
        }
        self.begin_if_needed(state)?;
        let pending = std::mem::take(&mut state.pending);
        let conn = self.conn.lock();
        let mut results: Vec<BatchResult> = Vec::new();
        for write in pending {
            let count = {
                let mut stmt = conn.prepare_cached(&write.sql)?;
                stmt.execute(params_from_iter(write.params.iter()))?
            };
            // consecutive runs of the same statement id collapse into one result
            match results.last_mut() {
                Some(last) if last.statement == write.statement => {
                    last.update_counts.push(count);
                }
                _ => results.push(BatchResult {
                    statement: write.statement,
                    update_counts: vec![count],
                }),
            }
        }
        state.dirty = true;
        debug!(session = %self.id, batches = results.len(), "flushed batch queue");
        Ok(results)
    }

    fn query_rows(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.prepare_read()?;
        let sql = self.registry.sql_for(statement)?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(materialize(&columns, row)?);
        }
        Ok(out)
    }

    fn run_write(&self, statement: &str, params: &[SqlValue]) -> Result<usize> {
        let sql = self.registry.sql_for(statement)?;
        let mut state = self.state.lock();
        if state.closed {
            return Err(DbSessionError::SessionClosed);
        }
        if self.mode.is_batched() {
            state.pending.push(PendingWrite {
                statement: statement.to_string(),
                sql,
                params: params.to_vec(),
            });
            state.dirty = true;
            debug!(session = %self.id, statement, queued = state.pending.len(), "queued batch write");
            return Ok(0);
        }
        self.begin_if_needed(&mut state)?;
        let conn = self.conn.lock();
        let count = {
            let mut stmt = conn.prepare_cached(&sql)?;
            stmt.execute(params_from_iter(params.iter()))?
        };
        state.dirty = true;
        Ok(count)
    }
}

fn materialize(columns: &[String], row: &rusqlite::Row<'_>) -> Result<Row> {
    let mut values = Vec::with_capacity(columns.len());
    for i in 0..columns.len() {
        values.push(SqlValue::from(row.get_ref(i)?));
    }
    Ok(Row::new(columns.to_vec(), values))
}

impl SqlSession for DbSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn mode(&self) -> SessionMode {
        self.mode
    }

    fn select_one(&self, statement: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        let mut rows = self.query_rows(statement, params)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.pop()),
            count => Err(DbSessionError::TooManyRows {
                statement: statement.to_string(),
                count,
            }),
        }
    }

    fn select_list(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.query_rows(statement, params)
    }

    fn select_page(
        &self,
        statement: &str,
        params: &[SqlValue],
        bounds: RowBounds,
    ) -> Result<Vec<Row>> {
        let rows = self.query_rows(statement, params)?;
        Ok(rows
            .into_iter()
            .skip(bounds.offset)
            .take(bounds.limit)
            .collect())
    }

    fn select_map(
        &self,
        statement: &str,
        params: &[SqlValue],
        key_column: &str,
    ) -> Result<HashMap<String, Row>> {
        let rows = self.query_rows(statement, params)?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let Some(value) = row.get(key_column) else {
                return Err(DbSessionError::InvalidParameter(format!(
                    "key column '{key_column}' is not part of statement '{statement}'"
                )));
            };
            if let Some(key) = value.as_map_key() {
                map.insert(key, row);
            }
        }
        Ok(map)
    }

    fn select_each(
        &self,
        statement: &str,
        params: &[SqlValue],
        handler: &mut dyn FnMut(Row) -> Result<()>,
    ) -> Result<()> {
        self.prepare_read()?;
        let sql = self.registry.sql_for(statement)?;
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(&sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        while let Some(row) = rows.next()? {
            handler(materialize(&columns, row)?)?;
        }
        Ok(())
    }

    fn insert(&self, statement: &str, params: &[SqlValue]) -> Result<usize> {
        self.run_write(statement, params)
    }

    fn update(&self, statement: &str, params: &[SqlValue]) -> Result<usize> {
        self.run_write(statement, params)
    }

    fn delete(&self, statement: &str, params: &[SqlValue]) -> Result<usize> {
        self.run_write(statement, params)
    }

    fn commit(&self, force: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DbSessionError::SessionClosed);
        }
        if !state.pending.is_empty() {
            self.flush_pending(&mut state)?;
        }
        if state.in_transaction && (force || state.dirty) {
            self.conn.lock().execute_batch("COMMIT")?;
            state.in_transaction = false;
            state.dirty = false;
            debug!(session = %self.id, mode = %self.mode, "committed");
        }
        Ok(())
    }

    fn rollback(&self, force: bool) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DbSessionError::SessionClosed);
        }
        let discarded = state.pending.len();
        state.pending.clear();
        if state.in_transaction && (force || state.dirty) {
            self.conn.lock().execute_batch("ROLLBACK")?;
            state.in_transaction = false;
            debug!(session = %self.id, mode = %self.mode, discarded, "rolled back");
        }
        state.dirty = false;
        Ok(())
    }

    fn flush_statements(&self) -> Result<Vec<BatchResult>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(DbSessionError::SessionClosed);
        }
        self.flush_pending(&mut state)
    }

    fn clear_cache(&self) -> Result<()> {
        let state = self.state.lock();
        if state.closed {
            return Err(DbSessionError::SessionClosed);
        }
        self.conn.lock().flush_prepared_statement_cache();
        Ok(())
    }

    fn statements(&self) -> Arc<StatementRegistry> {
        self.registry.clone()
    }

    fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        state.pending.clear();
        let mut result = Ok(());
        if state.in_transaction {
            // discard any uncommitted work before the connection is released
            result = self
                .conn
                .lock()
                .execute_batch("ROLLBACK")
                .map_err(DbSessionError::from);
            state.in_transaction = false;
        }
        state.dirty = false;
        state.closed = true;
        debug!(session = %self.id, mode = %self.mode, "closed session");
        result
    }
}
