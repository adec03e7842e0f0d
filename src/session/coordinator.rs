use crate::session::factory::SessionFactory;
use crate::session::handle::SqlSession;
use crate::session::mode::SessionMode;
use crate::session::non_closing::NonClosingSession;
use crate::Result;
use std::ops::Deref;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

pub type SharedSession = Arc<dyn SqlSession>;

/// Facade through which request-handling code acquires sessions.
///
/// Shared across threads; each request thread gets its own `SessionContext`
/// and drives the enable/open/disable lifecycle on it.
pub struct DbSessions {
    factory: Arc<dyn SessionFactory>,
}

impl DbSessions {
    pub fn new(factory: Arc<dyn SessionFactory>) -> Self {
        DbSessions { factory }
    }

    /// Create the per-request context that owns the caching state. One
    /// context per unit of work; never share a context across threads.
    pub fn new_context(&self) -> SessionContext {
        SessionContext {
            factory: self.factory.clone(),
            caching: false,
            immediate: None,
            batched: None,
        }
    }

    /// Open a one-shot session that is closed when the guard drops
    pub fn open_scoped(&self, mode: SessionMode) -> Result<ScopedSession> {
        let session: SharedSession = Arc::from(self.factory.open_session(mode)?);
        Ok(ScopedSession { session })
    }
}

/// Per-request session state: the caching flag plus one lazily populated
/// slot per mode. A populated slot doubles as the "was requested" marker.
///
/// Thread confinement is by ownership: all mutating operations take
/// `&mut self`, so no locking is needed and no cross-thread sharing of a
/// cached connection is possible.
pub struct SessionContext {
    factory: Arc<dyn SessionFactory>,
    caching: bool,
    immediate: Option<Arc<NonClosingSession>>,
    batched: Option<Arc<NonClosingSession>>,
}

impl SessionContext {
    /// Make subsequent `open_session` calls cache-aware. Idempotent.
    pub fn enable_caching(&mut self) {
        debug!(thread = ?thread::current().id(), "enabled session caching");
        self.caching = true;
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching
    }

    /// With caching disabled, every call opens a fresh session the caller
    /// fully owns. With caching enabled, the first call per mode creates a
    /// non-closing session and every later call returns the same instance.
    pub fn open_session(&mut self, mode: SessionMode) -> Result<SharedSession> {
        debug!(thread = ?thread::current().id(), mode = %mode, caching = self.caching, "open_session");
        if !self.caching {
            let session: SharedSession = Arc::from(self.factory.open_session(mode)?);
            debug!(session = %session.id(), mode = %mode, "created non cached session");
            return Ok(session);
        }
        let factory = self.factory.clone();
        let slot = match mode {
            SessionMode::Immediate => &mut self.immediate,
            SessionMode::Batched => &mut self.batched,
        };
        let session = match slot {
            Some(session) => session.clone(),
            None => {
                let inner = factory.open_session(mode)?;
                debug!(session = %inner.id(), mode = %mode, "created cached session");
                let session = Arc::new(NonClosingSession::new(inner));
                *slot = Some(session.clone());
                session
            }
        };
        Ok(session)
    }

    /// Tear down whatever sessions were actually created: rollback, then a
    /// real close of the delegate, then clear all per-context state. Failures
    /// are logged and swallowed; cleanup always completes. Safe without a
    /// prior `enable_caching` and safe to call repeatedly.
    pub fn disable_caching(&mut self) {
        debug!(thread = ?thread::current().id(), "disabled session caching");
        close_slot(self.immediate.take(), SessionMode::Immediate);
        close_slot(self.batched.take(), SessionMode::Batched);
        self.caching = false;
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        // a context dropped mid-unit-of-work still releases its connections
        if self.immediate.is_some() || self.batched.is_some() {
            self.disable_caching();
        }
    }
}

fn close_slot(slot: Option<Arc<NonClosingSession>>, mode: SessionMode) {
    let Some(session) = slot else {
        debug!(thread = ?thread::current().id(), mode = %mode, "no cached session to close");
        return;
    };
    let delegate = session.delegate();
    debug!(thread = ?thread::current().id(), mode = %mode, session = %delegate.id(), "closing cached session");
    if let Err(e) = delegate.rollback(true) {
        error!(
            thread = ?thread::current().id(),
            mode = %mode,
            session = %delegate.id(),
            error = %e,
            "failed to roll back cached session"
        );
    }
    if let Err(e) = delegate.close() {
        error!(
            thread = ?thread::current().id(),
            mode = %mode,
            session = %delegate.id(),
            error = %e,
            "failed to close cached session"
        );
    }
}

/// RAII guard for non-cached acquisitions: the session is closed when the
/// guard goes out of scope
pub struct ScopedSession {
    session: SharedSession,
}

impl ScopedSession {
    pub fn session(&self) -> &dyn SqlSession {
        self.session.as_ref()
    }
}

impl Deref for ScopedSession {
    type Target = dyn SqlSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Err(e) = self.session.close() {
            error!(session = %self.session.id(), error = %e, "failed to close scoped session");
        }
    }
}
