//! Detached background tasks.
//!
//! [`DetachedTasks::spawn`] starts a fallible future that nobody awaits.
//! Its error never reaches the caller; it is logged and counted in
//! [`DetachedStats`]. Callers use this for follow-up writes such as usage
//! records. The strategy engine never spawns detached work.
//!
//! At shutdown, [`DetachedTasks::drain`] gives outstanding tasks a bounded
//! amount of time to finish.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;

/// Outcome counters for detached tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetachedStats {
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct Inner {
    stats: Mutex<DetachedStats>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle for spawning fire-and-forget work. Clones share state.
#[derive(Clone, Default)]
pub struct DetachedTasks {
    inner: Arc<Inner>,
}

impl DetachedTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `future` in the background.
    ///
    /// Returns immediately. Must be called from within a tokio runtime.
    pub fn spawn<F, E>(&self, label: &'static str, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            match future.await {
                Ok(()) => {
                    tracing::debug!(task = label, "Detached task finished");
                    inner.stats.lock().successes += 1;
                }
                Err(e) => {
                    let message = e.to_string();
                    tracing::warn!(task = label, error = %message, "Detached task failed");
                    let mut stats = inner.stats.lock();
                    stats.failures += 1;
                    stats.last_error = Some(message);
                    stats.last_error_at = Some(Utc::now());
                }
            }
        });

        let mut handles = self.inner.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    pub fn stats(&self) -> DetachedStats {
        self.inner.stats.lock().clone()
    }

    /// Tasks spawned and not yet finished.
    pub fn pending(&self) -> usize {
        self.inner
            .handles
            .lock()
            .iter()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Wait up to `timeout` for outstanding tasks.
    ///
    /// Returns `false` if some were still running when the time ran out;
    /// those keep running until the runtime shuts down.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        if handles.is_empty() {
            return true;
        }

        let pending = handles.len();
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(pending, timeout = ?timeout, "Detached tasks still running at shutdown");
                false
            }
        }
    }
}

impl std::fmt::Debug for DetachedTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetachedTasks")
            .field("stats", &self.stats())
            .finish()
    }
}
