//! Debounced delivery of completed jobs.
//!
//! A backend graph may report results several times for one job (one
//! `executed` message per output node). [`DeliveryScheduler`] waits for a
//! quiet window after the most recent completion before handing the job
//! to the [`DeliverySink`], so each job is delivered once with its final
//! artifacts.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use relay_core::job_status::JobStatus;
use relay_db::{Job, JobRepository};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::sink::DeliverySink;

/// Quiet period after the last completion event before delivery fires.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// DebounceRegistry
// ---------------------------------------------------------------------------

struct Timer {
    generation: u64,
    cancel: CancellationToken,
}

struct Timers<K> {
    next_generation: u64,
    entries: HashMap<K, Timer>,
}

/// One pending timer per key, with cancel-and-replace semantics.
///
/// Scheduling a key that already has a pending timer cancels the old one
/// (its callback never runs) and starts a fresh window. When a window
/// expires the entry is removed and its callback runs on the spawned task.
pub struct DebounceRegistry<K> {
    window: Duration,
    timers: Arc<Mutex<Timers<K>>>,
}

impl<K> DebounceRegistry<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            timers: Arc::new(Mutex::new(Timers {
                next_generation: 0,
                entries: HashMap::new(),
            })),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Run `f` once `window` has passed without another `schedule` for `key`.
    pub async fn schedule<F, Fut>(&self, key: K, f: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let generation = {
            let mut timers = self.timers.lock().await;
            timers.next_generation += 1;
            let generation = timers.next_generation;
            let timer = Timer {
                generation,
                cancel: cancel.clone(),
            };
            if let Some(previous) = timers.entries.insert(key.clone(), timer) {
                previous.cancel.cancel();
                tracing::debug!(?key, "Superseded pending timer");
            }
            generation
        };

        let timers = Arc::clone(&self.timers);
        let window = self.window;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(window) => {}
            }

            // Claim the entry; a schedule that raced the wake-up wins.
            {
                let mut timers = timers.lock().await;
                match timers.entries.get(&key) {
                    Some(timer) if timer.generation == generation => {
                        timers.entries.remove(&key);
                    }
                    _ => return,
                }
            }

            f().await;
        });
    }

    /// Cancel the pending timer for `key`. Returns whether one existed.
    pub async fn cancel<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.timers.lock().await.entries.remove(key) {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every pending timer. Returns how many were cancelled.
    pub async fn cancel_all(&self) -> usize {
        let mut timers = self.timers.lock().await;
        let count = timers.entries.len();
        for (_, timer) in timers.entries.drain() {
            timer.cancel.cancel();
        }
        count
    }

    pub async fn is_pending<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.timers.lock().await.entries.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.timers.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

// ---------------------------------------------------------------------------
// DeliveryScheduler
// ---------------------------------------------------------------------------

/// Debounces delivery per correlation id and re-reads the job when the
/// window expires, so the sink always sees the latest persisted state.
pub struct DeliveryScheduler {
    timers: DebounceRegistry<String>,
    repo: Arc<dyn JobRepository>,
    sink: Arc<dyn DeliverySink>,
}

impl DeliveryScheduler {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        sink: Arc<dyn DeliverySink>,
        window: Duration,
    ) -> Self {
        Self {
            timers: DebounceRegistry::new(window),
            repo,
            sink,
        }
    }

    /// (Re)start the delivery timer for `job`.
    pub async fn schedule(&self, job: &Job) {
        let correlation_id = job.correlation_id.clone();
        let repo = Arc::clone(&self.repo);
        let sink = Arc::clone(&self.sink);

        tracing::debug!(
            job_id = job.id,
            prompt_id = %correlation_id,
            window_ms = self.timers.window().as_millis() as u64,
            "Delivery scheduled",
        );

        let key = correlation_id.clone();
        self.timers
            .schedule(key, move || async move {
                deliver_current(repo.as_ref(), sink.as_ref(), &correlation_id).await;
            })
            .await;
    }

    pub async fn cancel(&self, correlation_id: &str) -> bool {
        self.timers.cancel(correlation_id).await
    }

    pub async fn is_pending(&self, correlation_id: &str) -> bool {
        self.timers.is_pending(correlation_id).await
    }

    pub async fn pending_count(&self) -> usize {
        self.timers.len().await
    }

    /// Drop all pending deliveries without firing them.
    pub async fn shutdown(&self) -> usize {
        let cancelled = self.timers.cancel_all().await;
        if cancelled > 0 {
            tracing::info!(cancelled, "Cancelled pending deliveries");
        }
        cancelled
    }
}

async fn deliver_current(repo: &dyn JobRepository, sink: &dyn DeliverySink, correlation_id: &str) {
    let job = match repo.get_job_by_correlation_id(correlation_id).await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tracing::warn!(prompt_id = %correlation_id, "Job vanished before delivery");
            return;
        }
        Err(e) => {
            tracing::error!(prompt_id = %correlation_id, error = %e, "Failed to load job for delivery");
            return;
        }
    };

    if job.status != JobStatus::Completed {
        tracing::debug!(
            job_id = job.id,
            status = %job.status,
            "Skipping delivery for job that is no longer Completed",
        );
        return;
    }

    match sink.deliver(&job).await {
        Ok(()) => tracing::info!(
            job_id = job.id,
            prompt_id = %correlation_id,
            artifacts = job.artifacts.len(),
            "Delivery fired",
        ),
        Err(e) => tracing::error!(
            job_id = job.id,
            prompt_id = %correlation_id,
            error = %e,
            "Delivery failed",
        ),
    }
}
