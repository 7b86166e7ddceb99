//! Bounded pool of channel workers.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Runs at most `max_workers` units at once.
///
/// [`submit`](Self::submit) waits for a free slot instead of queueing, so the
/// caller is throttled to the pool's pace.
pub struct WorkerPool {
    max_workers: usize,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<JoinSet<()>>,
}

/// Held by a running unit; frees its slot on drop, including on panic.
struct SlotGuard {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl WorkerPool {
    pub fn new(max_workers: usize, cancellation_token: CancellationToken) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            semaphore: Arc::new(Semaphore::new(max_workers)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            cancellation_token,
            tasks: parking_lot::Mutex::new(JoinSet::new()),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Units currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait for a free slot and start `unit` in it.
    ///
    /// Returns `false` without running `unit` if the pool was cancelled while
    /// waiting.
    pub async fn submit<F>(&self, unit: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => return false,
            permit = self.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = SlotGuard {
            _permit: permit,
            in_flight: self.in_flight.clone(),
            idle: self.idle.clone(),
        };

        let mut tasks = self.tasks.lock();
        Self::reap(&mut tasks);
        tasks.spawn(async move {
            let _guard = guard;
            unit.await;
        });
        true
    }

    /// Wait until no unit is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stop admitting units and wait for the running ones to finish.
    pub async fn shutdown(&self) {
        info!("Stopping worker pool ({} in flight)", self.in_flight());
        self.cancellation_token.cancel();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                error!("Channel worker panicked: {e}");
            }
        }

        info!("Worker pool stopped");
    }

    fn reap(tasks: &mut JoinSet<()>) {
        while let Some(result) = tasks.try_join_next() {
            match result {
                Ok(()) => {}
                Err(e) if e.is_panic() => error!("Channel worker panicked: {e}"),
                Err(e) => debug!("Channel worker cancelled: {e}"),
            }
        }
    }
}
