use crate::{DbSessionError, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Registry mapping statement ids (e.g. `"rules.select_by_key"`) to SQL text.
///
/// One registry is shared by all sessions produced by a factory; sessions
/// resolve every statement id through it before execution. This is the
/// mapper-configuration surface of the session interface.
#[derive(Debug, Default)]
pub struct StatementRegistry {
    statements: RwLock<HashMap<String, String>>,
}

impl StatementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single statement. Re-registering an id replaces the SQL.
    pub fn register(&self, id: impl Into<String>, sql: impl Into<String>) {
        self.statements.write().insert(id.into(), sql.into());
    }

    /// Register a batch of statements
    pub fn register_all<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut statements = self.statements.write();
        for (id, sql) in entries {
            statements.insert(id.into(), sql.into());
        }
    }

    /// Resolve a statement id to its SQL text
    pub fn sql_for(&self, id: &str) -> Result<String> {
        self.statements
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DbSessionError::UnknownStatement(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.statements.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.statements.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.read().is_empty()
    }
}
