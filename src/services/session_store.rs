//! Session store.
//!
//! Sessions are mutated only through typed transitions; each carries a
//! cooperative cancel flag checked by the engine at iteration boundaries.
//! State is serialised to disk after every mutation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::error::SessionError;
use crate::domain::models::session::{Session, SessionState};

struct Entry {
    session: Session,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionsDocument {
    sessions: Vec<Session>,
}

/// Process-wide session store.
pub struct SessionStore {
    inner: RwLock<HashMap<String, Entry>>,
    path: Option<PathBuf>,
}

impl SessionStore {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            path,
        }
    }

    /// Create a session for a user intent.
    pub async fn create(&self, user_id: &str, intent: &str, budget_limit: f64) -> Session {
        let session = Session::new(user_id, intent, budget_limit);
        {
            let mut inner = self.inner.write().await;
            inner.insert(
                session.id.clone(),
                Entry {
                    session: session.clone(),
                    cancel: Arc::new(AtomicBool::new(false)),
                },
            );
        }
        self.persist().await;
        session
    }

    /// Snapshot of a session.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let inner = self.inner.read().await;
        inner.get(id).map(|e| e.session.clone())
    }

    /// Mutate a session under the store lock, then persist.
    pub async fn update<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Session) -> R,
    ) -> Result<R, SessionError> {
        let result = {
            let mut inner = self.inner.write().await;
            let entry = inner
                .get_mut(id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            f(&mut entry.session)
        };
        self.persist().await;
        Ok(result)
    }

    /// Apply a typed state transition.
    pub async fn transition(&self, id: &str, state: SessionState) -> Result<(), SessionError> {
        self.update(id, |s| s.transition_to(state)).await?
    }

    /// Increment and return the session's iteration counter.
    pub async fn increment_iteration(&self, id: &str) -> Result<u32, SessionError> {
        self.update(id, |s| {
            s.iteration += 1;
            s.iteration
        })
        .await
    }

    /// The session's cooperative cancel flag.
    pub async fn cancel_flag(&self, id: &str) -> Option<Arc<AtomicBool>> {
        let inner = self.inner.read().await;
        inner.get(id).map(|e| e.cancel.clone())
    }

    /// Request cooperative cancellation. Cancelling an already-cancelled
    /// session is a no-op.
    pub async fn cancel(&self, id: &str) -> Result<(), SessionError> {
        let inner = self.inner.read().await;
        let entry = inner
            .get(id)
            .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        entry.cancel.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn is_cancelled(&self, id: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .get(id)
            .is_some_and(|e| e.cancel.load(Ordering::SeqCst))
    }

    /// All sessions, for inspection.
    pub async fn list(&self) -> Vec<Session> {
        let inner = self.inner.read().await;
        inner.values().map(|e| e.session.clone()).collect()
    }

    async fn persist(&self) {
        let Some(ref path) = self.path else { return };
        let doc = {
            let inner = self.inner.read().await;
            let mut sessions: Vec<Session> = inner.values().map(|e| e.session.clone()).collect();
            sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            SessionsDocument { sessions }
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        match serde_json::to_string_pretty(&doc) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(path, json).await {
                    warn!(error = %e, "Failed to persist sessions");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize sessions"),
        }
    }
}
