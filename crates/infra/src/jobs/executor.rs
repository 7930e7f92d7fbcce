//! Fire-and-forget execution of song lifecycles.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use songsmith_core::SongId;

use super::lifecycle::{AdvanceOutcome, SongLifecycle};

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ExecutorStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub panicked: u64,
    pub in_flight: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    panicked: AtomicU64,
    in_flight: AtomicUsize,
}

#[derive(Debug, Default)]
struct Shared {
    counters: Counters,
    idle: Notify,
}

/// Runs each submitted song on its own Tokio task.
///
/// No queue, priority, or cancellation. Whatever happens inside a task
/// (error, panic) ends with the song in a terminal state when possible and
/// is never propagated to the submitter.
#[derive(Clone)]
pub struct BackgroundExecutor {
    lifecycle: Arc<SongLifecycle>,
    shared: Arc<Shared>,
}

impl BackgroundExecutor {
    pub fn new(lifecycle: Arc<SongLifecycle>) -> Self {
        Self {
            lifecycle,
            shared: Arc::new(Shared::default()),
        }
    }

    pub fn lifecycle(&self) -> &Arc<SongLifecycle> {
        &self.lifecycle
    }

    /// Start processing `song_id` in the background. Returns immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, song_id: SongId) {
        let counters = &self.shared.counters;
        counters.submitted.fetch_add(1, Ordering::Relaxed);
        counters.in_flight.fetch_add(1, Ordering::SeqCst);

        let lifecycle = self.lifecycle.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            run(&lifecycle, &shared, song_id).await;
            if shared.counters.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
                shared.idle.notify_waiters();
            }
        });
        debug!(song_id = %song_id, "song submitted");
    }

    pub fn stats(&self) -> ExecutorStats {
        let c = &self.shared.counters;
        ExecutorStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
            in_flight: c.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Wait until no task is in flight. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            // Register before checking so a notification between the check
            // and the await is not lost.
            notified.as_mut().enable();
            if self.shared.counters.in_flight.load(Ordering::SeqCst) == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.shared.counters.in_flight.load(Ordering::SeqCst) == 0;
            }
        }
    }
}

async fn run(lifecycle: &SongLifecycle, shared: &Shared, song_id: SongId) {
    let counters = &shared.counters;
    let outcome = AssertUnwindSafe(lifecycle.advance(song_id))
        .catch_unwind()
        .await;

    let abandon_detail = match outcome {
        Ok(Ok(AdvanceOutcome::Completed { .. })) => {
            counters.completed.fetch_add(1, Ordering::Relaxed);
            None
        }
        Ok(Ok(AdvanceOutcome::Failed { .. })) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            None
        }
        Ok(Ok(AdvanceOutcome::Missing | AdvanceOutcome::Skipped { .. } | AdvanceOutcome::Discarded)) => {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            None
        }
        Ok(Err(e)) => {
            error!(song_id = %song_id, error = %e, "song lifecycle aborted");
            counters.failed.fetch_add(1, Ordering::Relaxed);
            Some(format!("internal error: {e}"))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(song_id = %song_id, panic = %message, "song lifecycle panicked");
            counters.panicked.fetch_add(1, Ordering::Relaxed);
            counters.failed.fetch_add(1, Ordering::Relaxed);
            Some(format!("generation task panicked: {message}"))
        }
    };

    if let Some(detail) = abandon_detail {
        let marked = AssertUnwindSafe(lifecycle.abandon(song_id, &detail))
            .catch_unwind()
            .await;
        match marked {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(song_id = %song_id, error = %e, "could not mark song failed"),
            Err(_) => warn!(song_id = %song_id, "marking song failed panicked"),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
