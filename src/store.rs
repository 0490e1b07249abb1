//! Persistence contract for closed posture sessions.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{bail, Result};

use crate::models::PostureSession;

/// Append-only store of closed sessions.
///
/// `list_sessions` returns the most recent session first. Records are never
/// updated; `clear_all` is the only way to remove them.
pub trait SessionStore: Clone + Send + Sync + 'static {
    fn append_session(&self, session: PostureSession) -> impl Future<Output = Result<()>> + Send;

    fn list_sessions(&self) -> impl Future<Output = Result<Vec<PostureSession>>> + Send;

    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Process-local store, for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    sessions: Vec<PostureSession>,
    fail_writes: bool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail, to exercise write-failure handling.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }

    pub fn len(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SessionStore for MemorySessionStore {
    async fn append_session(&self, session: PostureSession) -> Result<()> {
        let mut state = self.state();
        if state.fail_writes {
            bail!("memory store rejected session {}", session.id);
        }
        if state.sessions.iter().any(|existing| existing.id == session.id) {
            bail!("session {} already stored", session.id);
        }
        state.sessions.push(session);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<PostureSession>> {
        let mut sessions = self.state().sessions.clone();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn clear_all(&self) -> Result<()> {
        self.state().sessions.clear();
        Ok(())
    }
}
