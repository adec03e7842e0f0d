use anyhow::Result;
use dbsessions::{
    DbSessionError, DbSessions, RowBounds, SessionMode, SqlSession, SqlValue,
    SqliteSessionFactory, StatementRegistry,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn registry() -> Arc<StatementRegistry> {
    let registry = StatementRegistry::new();
    registry.register_all([
        (
            "schema.create_users",
            "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, login TEXT NOT NULL, active INTEGER NOT NULL DEFAULT 1)",
        ),
        ("users.insert", "INSERT INTO users (login, active) VALUES (?1, ?2)"),
        (
            "users.select_by_login",
            "SELECT id, login, active FROM users WHERE login = ?1",
        ),
        (
            "users.select_all",
            "SELECT id, login, active FROM users ORDER BY id",
        ),
        ("users.count", "SELECT COUNT(*) AS n FROM users"),
        (
            "users.select_with_active_login",
            "SELECT id, login, CASE WHEN active = 1 THEN login END AS active_login FROM users ORDER BY id",
        ),
        ("users.deactivate", "UPDATE users SET active = 0 WHERE login = ?1"),
        ("users.delete_inactive", "DELETE FROM users WHERE active = 0"),
    ]);
    Arc::new(registry)
}

fn open_in_memory(mode: SessionMode) -> Result<Box<dyn SqlSession>> {
    use dbsessions::SessionFactory;
    dbsessions::logging::init();
    let factory = SqliteSessionFactory::in_memory(registry());
    let session = factory.open_session(mode)?;
    session.update("schema.create_users", &[])?;
    Ok(session)
}

fn insert_user(session: &dyn SqlSession, login: &str, active: bool) -> Result<usize> {
    Ok(session.insert(
        "users.insert",
        &[SqlValue::from(login), SqlValue::from(active)],
    )?)
}

fn count_users(session: &dyn SqlSession) -> Result<i64> {
    let row = session.select_one("users.count", &[])?.expect("count row");
    Ok(row.get_i64("n").expect("count value"))
}

#[test]
fn insert_and_select_one() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;

    assert_eq!(insert_user(session.as_ref(), "ada", true)?, 1);
    let row = session
        .select_one("users.select_by_login", &[SqlValue::from("ada")])?
        .expect("row");
    assert_eq!(row.get_str("login"), Some("ada"));
    assert_eq!(row.get_i64("active"), Some(1));

    let missing = session.select_one("users.select_by_login", &[SqlValue::from("ghost")])?;
    assert!(missing.is_none());
    Ok(())
}

#[test]
fn select_one_rejects_multiple_rows() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    insert_user(session.as_ref(), "a", true)?;
    insert_user(session.as_ref(), "b", true)?;

    let err = session.select_one("users.select_all", &[]).unwrap_err();
    assert!(matches!(
        err,
        DbSessionError::TooManyRows { count: 2, .. }
    ));
    Ok(())
}

#[test]
fn select_list_and_page() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    for login in ["a", "b", "c", "d"] {
        insert_user(session.as_ref(), login, true)?;
    }

    let all = session.select_list("users.select_all", &[])?;
    assert_eq!(all.len(), 4);

    let page = session.select_page("users.select_all", &[], RowBounds::new(1, 2))?;
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].get_str("login"), Some("b"));
    assert_eq!(page[1].get_str("login"), Some("c"));

    let unbounded = session.select_page("users.select_all", &[], RowBounds::default())?;
    assert_eq!(unbounded.len(), 4);
    Ok(())
}

#[test]
fn select_map_keyed_by_column() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    insert_user(session.as_ref(), "ada", true)?;
    insert_user(session.as_ref(), "bob", false)?;

    let by_login = session.select_map("users.select_all", &[], "login")?;
    assert_eq!(by_login.len(), 2);
    assert_eq!(by_login["bob"].get_i64("active"), Some(0));

    let err = session
        .select_map("users.select_all", &[], "nope")
        .unwrap_err();
    assert!(matches!(err, DbSessionError::InvalidParameter(_)));
    Ok(())
}

#[test]
fn select_map_skips_rows_with_null_key() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    insert_user(session.as_ref(), "ada", true)?;
    insert_user(session.as_ref(), "bob", false)?;

    // bob's active_login is NULL, so he has no key to be mapped under
    let map = session.select_map("users.select_with_active_login", &[], "active_login")?;
    assert_eq!(map.len(), 1);
    assert_eq!(map["ada"].get_str("login"), Some("ada"));
    assert!(!map.contains_key("bob"));
    Ok(())
}

#[test]
fn select_each_streams_and_aborts_on_handler_error() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    for login in ["a", "b", "c"] {
        insert_user(session.as_ref(), login, true)?;
    }

    let mut logins = Vec::new();
    session.select_each("users.select_all", &[], &mut |row| {
        logins.push(row.get_str("login").unwrap_or_default().to_string());
        Ok(())
    })?;
    assert_eq!(logins, vec!["a", "b", "c"]);

    let mut seen = 0;
    let err = session
        .select_each("users.select_all", &[], &mut |_row| {
            seen += 1;
            Err(DbSessionError::InvalidParameter("stop".to_string()))
        })
        .unwrap_err();
    assert!(matches!(err, DbSessionError::InvalidParameter(_)));
    assert_eq!(seen, 1);
    Ok(())
}

#[test]
fn update_delete_and_rollback_semantics() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    insert_user(session.as_ref(), "ada", true)?;
    insert_user(session.as_ref(), "bob", true)?;
    session.commit(false)?;

    assert_eq!(
        session.update("users.deactivate", &[SqlValue::from("bob")])?,
        1
    );
    assert_eq!(session.delete("users.delete_inactive", &[])?, 1);
    assert_eq!(count_users(session.as_ref())?, 1);

    // non-forced rollback discards the uncommitted delete
    session.rollback(false)?;
    assert_eq!(count_users(session.as_ref())?, 2);

    // clean session: non-forced rollback and commit are no-ops
    session.rollback(false)?;
    session.commit(false)?;
    Ok(())
}

#[test]
fn batched_session_queues_until_flush() -> Result<()> {
    let session = open_in_memory(SessionMode::Batched)?;
    session.flush_statements()?; // DDL went through the queue already

    // queued writes report no affected rows yet
    assert_eq!(insert_user(session.as_ref(), "a", true)?, 0);
    assert_eq!(insert_user(session.as_ref(), "b", true)?, 0);
    assert_eq!(
        session.update("users.deactivate", &[SqlValue::from("a")])?,
        0
    );
    assert_eq!(insert_user(session.as_ref(), "c", true)?, 0);

    let results = session.flush_statements()?;
    let shape: Vec<(&str, usize)> = results
        .iter()
        .map(|r| (r.statement.as_str(), r.update_counts.len()))
        .collect();
    assert_eq!(
        shape,
        vec![
            ("users.insert", 2),
            ("users.deactivate", 1),
            ("users.insert", 1)
        ]
    );
    assert!(results.iter().all(|r| r.update_counts.iter().all(|&c| c == 1)));

    session.commit(true)?;
    assert_eq!(count_users(session.as_ref())?, 3);
    Ok(())
}

#[test]
fn batched_session_flushes_before_reads() -> Result<()> {
    let session = open_in_memory(SessionMode::Batched)?;
    insert_user(session.as_ref(), "ada", true)?;

    // the queued insert must be visible to a read on the same session
    assert_eq!(count_users(session.as_ref())?, 1);
    Ok(())
}

#[test]
fn batched_rollback_discards_queue() -> Result<()> {
    let session = open_in_memory(SessionMode::Batched)?;
    session.flush_statements()?;
    session.commit(true)?;

    insert_user(session.as_ref(), "ada", true)?;
    session.rollback(false)?;
    assert_eq!(count_users(session.as_ref())?, 0);
    Ok(())
}

#[test]
fn commit_flushes_pending_batch() -> Result<()> {
    let session = open_in_memory(SessionMode::Batched)?;
    session.flush_statements()?;

    insert_user(session.as_ref(), "ada", true)?;
    session.commit(false)?;
    assert_eq!(count_users(session.as_ref())?, 1);
    Ok(())
}

#[test]
fn closed_session_rejects_operations() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    session.close()?;
    session.close()?; // idempotent

    let err = session.select_list("users.select_all", &[]).unwrap_err();
    assert!(matches!(err, DbSessionError::SessionClosed));
    let err = insert_user(session.as_ref(), "x", true).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbSessionError>(),
        Some(DbSessionError::SessionClosed)
    ));
    Ok(())
}

#[test]
fn unknown_statement_id() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    let err = session.select_list("users.missing", &[]).unwrap_err();
    assert!(matches!(err, DbSessionError::UnknownStatement(id) if id == "users.missing"));
    Ok(())
}

#[test]
fn clear_cache_keeps_session_working() -> Result<()> {
    let session = open_in_memory(SessionMode::Immediate)?;
    insert_user(session.as_ref(), "ada", true)?;
    session.clear_cache()?;
    assert_eq!(count_users(session.as_ref())?, 1);
    Ok(())
}

#[test]
fn teardown_discards_uncommitted_work() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.db").to_string_lossy().to_string();
    let factory = Arc::new(SqliteSessionFactory::new(&path, registry()));
    let sessions = DbSessions::new(factory);

    {
        let setup = sessions.open_scoped(SessionMode::Immediate)?;
        setup.update("schema.create_users", &[])?;
        setup.commit(true)?;
    }

    let mut ctx = sessions.new_context();
    ctx.enable_caching();
    let session = ctx.open_session(SessionMode::Immediate)?;
    session.insert(
        "users.insert",
        &[SqlValue::from("ghost"), SqlValue::from(true)],
    )?;

    // callers closing "their" session must not lose the cached connection
    session.close()?;
    session.insert(
        "users.insert",
        &[SqlValue::from("ghost2"), SqlValue::from(true)],
    )?;

    ctx.disable_caching();

    let verify = sessions.open_scoped(SessionMode::Immediate)?;
    assert_eq!(count_users(verify.session())?, 0);
    Ok(())
}

#[test]
fn committed_work_survives_teardown() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sessions.db").to_string_lossy().to_string();
    let factory = Arc::new(SqliteSessionFactory::new(&path, registry()));
    let sessions = DbSessions::new(factory);

    {
        let setup = sessions.open_scoped(SessionMode::Immediate)?;
        setup.update("schema.create_users", &[])?;
        setup.commit(true)?;
    }

    let mut ctx = sessions.new_context();
    ctx.enable_caching();
    let session = ctx.open_session(SessionMode::Immediate)?;
    session.insert(
        "users.insert",
        &[SqlValue::from("ada"), SqlValue::from(true)],
    )?;
    session.commit(false)?;
    ctx.disable_caching();

    let verify = sessions.open_scoped(SessionMode::Immediate)?;
    assert_eq!(count_users(verify.session())?, 1);
    Ok(())
}
