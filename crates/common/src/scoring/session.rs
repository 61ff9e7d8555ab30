//! Reusable primed-session cache
//!
//! Holds at most one session and the number of times it has been handed out.
//! A session is recreated when absent or after `max_uses` acquisitions.
//! Creation runs outside the lock, so two callers racing on an expired
//! session may both create one; the last to finish is kept.

use crate::errors::Result;
use crate::metrics;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct CacheState<S> {
    session: Option<Arc<S>>,
    uses: u32,
}

pub struct SessionCache<S> {
    max_uses: u32,
    state: Mutex<CacheState<S>>,
}

impl<S> SessionCache<S> {
    pub fn new(max_uses: u32) -> Self {
        Self {
            max_uses: max_uses.max(1),
            state: Mutex::new(CacheState { session: None, uses: 0 }),
        }
    }

    /// Return the live session, creating a new one with `create` when needed
    pub async fn acquire<F, Fut>(&self, create: F) -> Result<Arc<S>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S>>,
    {
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if let Some(session) = &state.session {
                if state.uses < self.max_uses {
                    state.uses += 1;
                    return Ok(session.clone());
                }
            }
        }

        let fresh = Arc::new(create().await?);

        let mut state = self.state.lock().await;
        state.session = Some(fresh.clone());
        state.uses = 1;
        metrics::record_session_created();
        debug!(max_uses = self.max_uses, "Scoring session created");

        Ok(fresh)
    }

    /// Drop the cached session so the next acquisition recreates it
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        state.session = None;
        state.uses = 0;
    }

    /// Acquisitions served by the current session
    pub async fn uses(&self) -> u32 {
        self.state.lock().await.uses
    }
}
