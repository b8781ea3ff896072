//! Tracked background work.
//!
//! Handlers hand detached work to a [`BackgroundTracker`]; the server lifecycle
//! waits on the same tracker before the process exits, so work started by a
//! request is never cut off by shutdown.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::middleware::panic_message;

#[derive(Debug, Default)]
struct Inner {
    outstanding: AtomicUsize,
    drained: Notify,
}

/// Counts outstanding background tasks. Cloning shares the counter.
#[derive(Debug, Clone, Default)]
pub struct BackgroundTracker {
    inner: Arc<Inner>,
}

/// Held by a running task; deregisters it exactly once when dropped.
pub(crate) struct Registration {
    inner: Arc<Inner>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.drained.notify_waiters();
        }
    }
}

impl BackgroundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count the caller as outstanding until the returned guard drops.
    pub(crate) fn register(&self) -> Registration {
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Registration {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Run `task` on its own tokio task.
    ///
    /// The task is counted before this returns. A panic inside it is logged and
    /// does not reach the spawner.
    pub fn spawn<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let registration = self.register();
        tokio::spawn(async move {
            let _registration = registration;
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                tracing::error!(
                    task = name,
                    panic = %panic_message(panic.as_ref()),
                    "background task panicked"
                );
            }
        })
    }

    /// [`spawn`](Self::spawn) for synchronous work, on the blocking pool.
    pub fn spawn_blocking<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let registration = self.register();
        tokio::task::spawn_blocking(move || {
            let _registration = registration;
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(
                    task = name,
                    panic = %panic_message(panic.as_ref()),
                    "background task panicked"
                );
            }
        })
    }

    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Resolve once no task is outstanding.
    pub async fn wait(&self) {
        loop {
            let drained = self.inner.drained.notified();
            tokio::pin!(drained);
            // Register before reading the counter so a concurrent final
            // decrement cannot be missed.
            drained.as_mut().enable();

            if self.outstanding() == 0 {
                return;
            }
            drained.await;
        }
    }
}
