//! Bounded worker pool with FIFO dispatch, per-key exclusivity, and lease-based recovery.
//!
//! `enqueue` never blocks: it registers the job key and pushes onto an unbounded FIFO channel.
//! A dispatcher task pops submissions in order and waits for a pool permit before spawning the
//! worker, so at most `pool_size` jobs run at once and the rest wait their turn. A job key stays
//! registered from enqueue until the job finishes, which rejects duplicate submissions and
//! guarantees a single active worker per key.
//!
//! Workers renew a lease through their [`JobContext`]. A watchdog aborts any worker whose lease
//! has not been renewed within `lease_timeout`; the job is then resubmitted until
//! `max_attempts` is reached and failed afterwards. A panicking worker is handled the same way.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::metrics::ServiceMetrics;

/// Worker pool and lease parameters.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Maximum number of concurrently running jobs.
    pub pool_size: usize,
    /// Time a worker may go without renewing its lease before it is reclaimed.
    pub lease_timeout: Duration,
    /// How often the watchdog scans leases.
    pub lease_check_interval: Duration,
    /// Total attempts per job when workers crash or stall.
    pub max_attempts: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            pool_size: 4,
            lease_timeout: Duration::from_secs(120),
            lease_check_interval: Duration::from_secs(30),
            max_attempts: 2,
        }
    }
}

/// Errors returned by [`Scheduler::enqueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// A job with the same key is queued or running.
    #[error("job '{0}' is already queued or running")]
    AlreadyActive(String),
    /// The dispatcher is gone; no more jobs are accepted.
    #[error("scheduler is shut down")]
    ShutDown,
}

/// How a job run ended when it did not succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// The cancellation flag was observed at a checkpoint.
    #[error("cancelled")]
    Cancelled,
    /// The job failed with a human-readable cause.
    #[error("{0}")]
    Failed(String),
}

/// Unit of background work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Exclusivity key; two jobs with the same key never run concurrently.
    fn key(&self) -> String;

    /// Execute the job. Long-running work must call [`JobContext::checkpoint`] regularly.
    async fn run(&self, ctx: JobContext) -> Result<(), JobError>;

    /// Record a terminal failure with `cause`, preserving the last progress snapshot.
    async fn fail(&self, cause: String);
}

/// Cooperative cancellation flag shared between the scheduler and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Time-bounded claim on a job, renewed by its worker.
#[derive(Debug, Clone)]
pub struct Lease {
    origin: Instant,
    renewed_ms: Arc<AtomicU64>,
}

impl Lease {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            renewed_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record that the worker is alive.
    pub fn renew(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.renewed_ms.fetch_max(elapsed, Ordering::Relaxed);
    }

    /// Time since the last renewal.
    pub fn age(&self) -> Duration {
        let renewed = Duration::from_millis(self.renewed_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(renewed)
    }
}

/// Handle given to a running job.
#[derive(Debug, Clone)]
pub struct JobContext {
    key: String,
    attempt: u32,
    lease: Lease,
    cancel: CancelFlag,
}

impl JobContext {
    /// Key of the running job.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// 1-based attempt number; greater than one after a reclaim.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Renew the worker lease.
    pub fn renew_lease(&self) {
        self.lease.renew();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Renew the lease and stop with [`JobError::Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        self.renew_lease();
        if self.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }
}

struct Submission {
    job: Arc<dyn Job>,
    attempt: u32,
}

struct RunningJob {
    lease: Lease,
    abort: AbortHandle,
}

struct ActiveJob {
    cancel: CancelFlag,
    running: Option<RunningJob>,
}

struct Inner {
    settings: SchedulerSettings,
    active: Mutex<HashMap<String, ActiveJob>>,
    idle: Notify,
    metrics: Arc<ServiceMetrics>,
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ActiveJob>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self, key: &str) {
        let empty = {
            let mut guard = self.lock();
            guard.remove(key);
            guard.is_empty()
        };
        if empty {
            self.idle.notify_waiters();
        }
    }

    fn reap_expired_leases(&self) {
        let mut guard = self.lock();
        for (key, job) in guard.iter_mut() {
            let expired = job
                .running
                .as_ref()
                .is_some_and(|running| running.lease.age() > self.settings.lease_timeout);
            if expired && let Some(running) = job.running.take() {
                tracing::warn!(
                    job = %key,
                    idle_ms = running.lease.age().as_millis() as u64,
                    "Worker lease expired; reclaiming job"
                );
                running.abort.abort();
            }
        }
    }
}

/// Bounded, FIFO, lease-supervised job executor.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<Submission>,
}

impl Scheduler {
    /// Start the dispatcher and lease watchdog on the current tokio runtime.
    pub fn start(settings: SchedulerSettings, metrics: Arc<ServiceMetrics>) -> Self {
        let pool_size = settings.pool_size.max(1);
        let check_interval = settings.lease_check_interval.max(Duration::from_millis(1));
        let inner = Arc::new(Inner {
            settings,
            active: Mutex::new(HashMap::new()),
            idle: Notify::new(),
            metrics,
        });
        let (queue, receiver) = mpsc::unbounded_channel();

        tokio::spawn(dispatch(
            Arc::downgrade(&inner),
            receiver,
            queue.downgrade(),
            Arc::new(Semaphore::new(pool_size)),
        ));
        tokio::spawn(watch_leases(Arc::downgrade(&inner), check_interval));
        tracing::info!(pool_size, "Job scheduler started");

        Self { inner, queue }
    }

    /// Queue a job without blocking. Fails if the key is already queued or running.
    pub fn enqueue(&self, job: Arc<dyn Job>) -> Result<String, SchedulerError> {
        let key = job.key();
        {
            let mut guard = self.inner.lock();
            if guard.contains_key(&key) {
                return Err(SchedulerError::AlreadyActive(key));
            }
            guard.insert(
                key.clone(),
                ActiveJob {
                    cancel: CancelFlag::default(),
                    running: None,
                },
            );
        }
        if self.queue.send(Submission { job, attempt: 1 }).is_err() {
            self.inner.release(&key);
            return Err(SchedulerError::ShutDown);
        }
        tracing::debug!(job = %key, "Job enqueued");
        Ok(key)
    }

    /// Request cooperative cancellation. Returns `false` if the key is not active.
    pub fn cancel(&self, key: &str) -> bool {
        match self.inner.lock().get(key) {
            Some(job) => {
                job.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Request cancellation of every queued or running job. Returns how many were flagged.
    pub fn cancel_all(&self) -> usize {
        let guard = self.inner.lock();
        for job in guard.values() {
            job.cancel.cancel();
        }
        guard.len()
    }

    /// Whether a job with this key is queued or running.
    pub fn is_active(&self, key: &str) -> bool {
        self.inner.lock().contains_key(key)
    }

    /// Number of queued or running jobs.
    pub fn active_count(&self) -> usize {
        self.inner.lock().len()
    }

    /// Wait until no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.active_count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

async fn dispatch(
    inner: Weak<Inner>,
    mut receiver: mpsc::UnboundedReceiver<Submission>,
    queue: mpsc::WeakUnboundedSender<Submission>,
    slots: Arc<Semaphore>,
) {
    while let Some(submission) = receiver.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let Some(queue) = queue.upgrade() else {
            break;
        };
        tokio::spawn(supervise(inner, queue, submission, permit));
    }
    tracing::debug!("Job dispatcher stopped");
}

async fn watch_leases(inner: Weak<Inner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.reap_expired_leases();
    }
}

async fn supervise(
    inner: Arc<Inner>,
    queue: mpsc::UnboundedSender<Submission>,
    submission: Submission,
    permit: OwnedSemaphorePermit,
) {
    let Submission { job, attempt } = submission;
    let key = job.key();
    let Some(cancel) = inner.lock().get(&key).map(|active| active.cancel.clone()) else {
        return;
    };

    if cancel.is_cancelled() {
        tracing::info!(job = %key, "Job cancelled before start");
        job.fail("cancelled".to_string()).await;
        inner.release(&key);
        return;
    }

    let lease = Lease::new();
    let ctx = JobContext {
        key: key.clone(),
        attempt,
        lease: lease.clone(),
        cancel,
    };
    let worker = job.clone();
    let handle = tokio::spawn(async move { worker.run(ctx).await });
    if let Some(active) = inner.lock().get_mut(&key) {
        active.running = Some(RunningJob {
            lease,
            abort: handle.abort_handle(),
        });
    }

    match handle.await {
        Ok(Ok(())) => {
            tracing::debug!(job = %key, attempt, "Job finished");
        }
        Ok(Err(error)) => {
            tracing::warn!(job = %key, attempt, error = %error, "Job failed");
            job.fail(error.to_string()).await;
        }
        Err(join_error) => {
            let reason = if join_error.is_panic() {
                "worker panicked"
            } else {
                "worker lease expired"
            };
            if attempt < inner.settings.max_attempts {
                inner.metrics.record_lease_reclaim();
                tracing::warn!(job = %key, attempt, reason, "Re-enqueueing reclaimed job");
                if let Some(active) = inner.lock().get_mut(&key) {
                    active.running = None;
                }
                drop(permit);
                let retry = Submission {
                    job: job.clone(),
                    attempt: attempt + 1,
                };
                if queue.send(retry).is_ok() {
                    return;
                }
                job.fail(format!("{reason}; scheduler shut down before retry"))
                    .await;
            } else {
                tracing::error!(job = %key, attempt, reason, "Job exhausted its attempts");
                job.fail(format!("{reason} after {attempt} attempt(s)")).await;
            }
        }
    }
    inner.release(&key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::UnboundedSender;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Started(String, u32),
        Finished(String),
        Failed(String, String),
    }

    enum Behavior {
        Sleep(Duration),
        Hang,
        Panic,
        Error,
        CheckCancel,
    }

    struct TestJob {
        key: String,
        behavior: Behavior,
        events: UnboundedSender<Event>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for TestJob {
        fn key(&self) -> String {
            self.key.clone()
        }

        async fn run(&self, ctx: JobContext) -> Result<(), JobError> {
            let _ = self
                .events
                .send(Event::Started(self.key.clone(), ctx.attempt()));
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let result = match &self.behavior {
                Behavior::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok(())
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
                Behavior::Panic => panic!("boom"),
                Behavior::Error => Err(JobError::Failed("embedding provider exhausted".into())),
                Behavior::CheckCancel => loop {
                    ctx.checkpoint()?;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                },
            };
            self.running.fetch_sub(1, Ordering::SeqCst);
            if result.is_ok() {
                let _ = self.events.send(Event::Finished(self.key.clone()));
            }
            result
        }

        async fn fail(&self, cause: String) {
            let _ = self.events.send(Event::Failed(self.key.clone(), cause));
        }
    }

    struct Harness {
        scheduler: Scheduler,
        events: UnboundedSender<Event>,
        receiver: mpsc::UnboundedReceiver<Event>,
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        metrics: Arc<ServiceMetrics>,
    }

    impl Harness {
        fn new(settings: SchedulerSettings) -> Self {
            let (events, receiver) = mpsc::unbounded_channel();
            let metrics = Arc::new(ServiceMetrics::new());
            Self {
                scheduler: Scheduler::start(settings, metrics.clone()),
                events,
                receiver,
                running: Arc::new(AtomicUsize::new(0)),
                peak: Arc::new(AtomicUsize::new(0)),
                metrics,
            }
        }

        fn job(&self, key: &str, behavior: Behavior) -> Arc<dyn Job> {
            Arc::new(TestJob {
                key: key.to_string(),
                behavior,
                events: self.events.clone(),
                running: self.running.clone(),
                peak: self.peak.clone(),
            })
        }

        async fn drain(&mut self) -> Vec<Event> {
            self.scheduler.wait_idle().await;
            let mut events = Vec::new();
            while let Ok(event) = self.receiver.try_recv() {
                events.push(event);
            }
            events
        }
    }

    fn settings(pool_size: usize) -> SchedulerSettings {
        SchedulerSettings {
            pool_size,
            lease_timeout: Duration::from_millis(80),
            lease_check_interval: Duration::from_millis(10),
            max_attempts: 2,
        }
    }

    #[tokio::test]
    async fn jobs_start_in_fifo_order_with_single_slot() {
        let mut harness = Harness::new(settings(1));
        for key in ["a", "b", "c"] {
            harness
                .scheduler
                .enqueue(harness.job(key, Behavior::Sleep(Duration::from_millis(5))))
                .unwrap();
        }
        let started: Vec<String> = harness
            .drain()
            .await
            .into_iter()
            .filter_map(|event| match event {
                Event::Started(key, _) => Some(key),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_pool_size() {
        let mut harness = Harness::new(settings(2));
        for i in 0..6 {
            harness
                .scheduler
                .enqueue(harness.job(&format!("job-{i}"), Behavior::Sleep(Duration::from_millis(20))))
                .unwrap();
        }
        let events = harness.drain().await;
        let finished = events
            .iter()
            .filter(|event| matches!(event, Event::Finished(_)))
            .count();
        assert_eq!(finished, 6);
        assert_eq!(harness.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn duplicate_keys_are_rejected_while_active() {
        let mut harness = Harness::new(settings(2));
        harness
            .scheduler
            .enqueue(harness.job("doc-1", Behavior::Sleep(Duration::from_millis(20))))
            .unwrap();
        let duplicate = harness
            .scheduler
            .enqueue(harness.job("doc-1", Behavior::Sleep(Duration::from_millis(1))));
        assert_eq!(duplicate, Err(SchedulerError::AlreadyActive("doc-1".into())));

        harness.drain().await;
        assert!(!harness.scheduler.is_active("doc-1"));
        harness
            .scheduler
            .enqueue(harness.job("doc-1", Behavior::Sleep(Duration::from_millis(1))))
            .expect("key is free again after completion");
        harness.drain().await;
    }

    #[tokio::test]
    async fn stalled_worker_is_reclaimed_once_then_failed() {
        let mut harness = Harness::new(settings(1));
        harness.scheduler.enqueue(harness.job("stuck", Behavior::Hang)).unwrap();
        let events = harness.drain().await;

        let attempts: Vec<u32> = events
            .iter()
            .filter_map(|event| match event {
                Event::Started(_, attempt) => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Failed(key, cause) if key == "stuck" && cause.contains("lease expired")
        )));
        assert_eq!(harness.metrics.snapshot().lease_reclaims, 1);
    }

    #[tokio::test]
    async fn panicking_worker_is_retried_then_failed() {
        let mut harness = Harness::new(settings(1));
        harness.scheduler.enqueue(harness.job("crash", Behavior::Panic)).unwrap();
        let events = harness.drain().await;
        assert!(events.iter().any(|event| matches!(
            event,
            Event::Failed(_, cause) if cause.contains("panicked after 2")
        )));
    }

    #[tokio::test]
    async fn job_errors_fail_without_retry() {
        let mut harness = Harness::new(settings(1));
        harness.scheduler.enqueue(harness.job("bad", Behavior::Error)).unwrap();
        let events = harness.drain().await;
        let starts = events
            .iter()
            .filter(|event| matches!(event, Event::Started(..)))
            .count();
        assert_eq!(starts, 1);
        assert!(events.contains(&Event::Failed(
            "bad".into(),
            "embedding provider exhausted".into()
        )));
    }

    #[tokio::test]
    async fn cancellation_is_cooperative() {
        let mut harness = Harness::new(settings(1));
        harness.scheduler.enqueue(harness.job("long", Behavior::CheckCancel)).unwrap();
        harness
            .scheduler
            .enqueue(harness.job("queued", Behavior::Sleep(Duration::from_millis(1))))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(harness.scheduler.cancel("long"));
        assert!(harness.scheduler.cancel("queued"));
        assert!(!harness.scheduler.cancel("unknown"));

        let events = harness.drain().await;
        assert!(events.contains(&Event::Failed("long".into(), "cancelled".into())));
        assert!(events.contains(&Event::Failed("queued".into(), "cancelled".into())));
        assert!(!events.contains(&Event::Started("queued".into(), 1)));
    }

    #[test]
    fn lease_age_resets_on_renew() {
        let lease = Lease::new();
        std::thread::sleep(Duration::from_millis(15));
        assert!(lease.age() >= Duration::from_millis(10));
        lease.renew();
        assert!(lease.age() < Duration::from_millis(10));
    }
}
