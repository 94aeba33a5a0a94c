use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    clock::{delay_until, Clock, SystemClock},
    error::{Result, SchedulerError},
    registry::{Handler, HandlerFuture, HandlerRegistry},
    store::JobStore,
    timer::WakeUpTimer,
    types::{Job, JobFilter, NewJob},
};

/// Receives every error raised inside the claim/dispatch/re-arm cycle.
pub type ErrorSink = Arc<dyn Fn(SchedulerError) + Send + Sync>;

/// Single-timer job scheduler over a [`JobStore`].
///
/// Cheap to clone; all clones drive the same timer and registry. The store is
/// the only place jobs live: the scheduler keeps nothing but the next wake-up
/// and its handlers, so several instances (or processes) can share a store and
/// a restart loses nothing.
#[derive(Clone)]
pub struct Scheduler {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    store: Arc<dyn JobStore>,
    registry: RwLock<HandlerRegistry>,
    timer: WakeUpTimer,
    /// Serializes re-arm passes so an older minimum never overwrites a newer arm.
    rearm_lock: tokio::sync::Mutex<()>,
    started: AtomicBool,
    error_sink: ErrorSink,
    pub(crate) clock: Arc<dyn Clock>,
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    store: Arc<dyn JobStore>,
    error_sink: Option<ErrorSink>,
    clock: Option<Arc<dyn Clock>>,
}

impl SchedulerBuilder {
    /// Route cycle errors to `sink` instead of the default `tracing` log.
    pub fn error_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(SchedulerError) + Send + Sync + 'static,
    {
        self.error_sink = Some(Arc::new(sink));
        self
    }

    pub fn clock(mut self, clock: impl Clock) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn build(self) -> Scheduler {
        Scheduler {
            inner: Arc::new(Inner {
                store: self.store,
                registry: RwLock::new(HandlerRegistry::new()),
                timer: WakeUpTimer::new(),
                rearm_lock: tokio::sync::Mutex::new(()),
                started: AtomicBool::new(false),
                error_sink: self.error_sink.unwrap_or_else(|| Arc::new(log_error)),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            }),
        }
    }
}

fn log_error(err: SchedulerError) {
    error!(code = err.code(), "scheduler error: {err}");
}

impl Scheduler {
    /// Scheduler with the default error sink and the system clock.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self::builder(store).build()
    }

    pub fn builder(store: Arc<dyn JobStore>) -> SchedulerBuilder {
        SchedulerBuilder {
            store,
            error_sink: None,
            clock: None,
        }
    }

    /// Ensure the store's date index, then arm the first wake-up.
    ///
    /// Idempotent. Jobs submitted before `start` are persisted but nothing
    /// fires until it runs.
    pub async fn start(&self) -> Result<()> {
        self.inner.store.ensure_date_index().await?;
        if !self.inner.started.swap(true, Ordering::AcqRel) {
            info!("scheduler started");
        }
        self.inner.try_rearm().await
    }

    /// Disarm the wake-up. Handlers already dispatched keep running.
    pub async fn stop(&self) {
        let _pass = self.inner.rearm_lock.lock().await;
        if self.inner.started.swap(false, Ordering::AcqRel) {
            info!("scheduler stopped");
        }
        self.inner.timer.disarm();
    }

    /// Register or replace the handler for `name`.
    pub fn define<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value, DateTime<Utc>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |data: Value, date: DateTime<Utc>| -> HandlerFuture {
                Box::pin(handler(data, date))
            });
        self.define_handler(name, handler);
    }

    pub fn define_handler(&self, name: impl Into<String>, handler: Handler) {
        let name = name.into();
        debug!(%name, "handler defined");
        self.inner
            .registry
            .write()
            .expect("handler registry poisoned")
            .define(name, handler);
    }

    /// Validate and persist one job, then re-arm.
    pub async fn submit(&self, job: NewJob) -> Result<Job> {
        let job = job.into_job()?;
        self.inner.store.insert_one(&job).await?;
        info!(job_id = %job.id, name = %job.name, date = %job.date, "job submitted");
        self.inner.rearm().await;
        Ok(job)
    }

    /// Validate every job first; persist them in one insert and re-arm once.
    pub async fn submit_many(&self, jobs: impl IntoIterator<Item = NewJob>) -> Result<Vec<Job>> {
        let jobs = jobs
            .into_iter()
            .map(NewJob::into_job)
            .collect::<Result<Vec<_>>>()?;
        if jobs.is_empty() {
            return Ok(jobs);
        }
        self.inner.store.insert_many(&jobs).await?;
        info!(count = jobs.len(), "jobs submitted");
        self.inner.rearm().await;
        Ok(jobs)
    }

    /// Delete pending jobs matching `filter`. Re-arms only if any were removed.
    pub async fn cancel(&self, filter: &JobFilter) -> Result<u64> {
        let removed = self.inner.store.delete_matching(filter).await?;
        if removed > 0 {
            info!(removed, "jobs cancelled");
            self.inner.rearm().await;
        }
        Ok(removed)
    }

    /// Pending jobs matching `filter`.
    pub async fn find(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        Ok(self.inner.store.find_matching(filter).await?)
    }

    /// Re-read the earliest due date from the store and re-arm.
    ///
    /// Picks up jobs that other schedulers wrote to a shared store. Failures
    /// go to the error sink. Does nothing before `start`.
    pub async fn refresh(&self) {
        self.inner.rearm().await;
    }

    /// Due date the wake-up is currently armed for.
    pub fn next_wake_up(&self) -> Option<DateTime<Utc>> {
        self.inner.timer.target()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("started", &self.is_started())
            .field("next_wake_up", &self.next_wake_up())
            .finish_non_exhaustive()
    }
}

impl Inner {
    pub(crate) fn report(&self, err: SchedulerError) {
        (self.error_sink)(err);
    }

    pub(crate) fn handler(&self, name: &str) -> Option<Handler> {
        self.registry
            .read()
            .expect("handler registry poisoned")
            .handler(name)
    }

    pub(crate) fn store(&self) -> &dyn JobStore {
        self.store.as_ref()
    }

    pub(crate) fn registry_mut(&self) -> std::sync::RwLockWriteGuard<'_, HandlerRegistry> {
        self.registry.write().expect("handler registry poisoned")
    }

    /// Re-arm, reporting failures to the error sink.
    pub(crate) async fn rearm(self: &Arc<Self>) {
        if let Err(err) = self.try_rearm().await {
            self.report(err);
        }
    }

    /// Recompute the earliest due date and replace the wake-up accordingly.
    ///
    /// A failed query leaves the current timer untouched.
    async fn try_rearm(self: &Arc<Self>) -> Result<()> {
        let _pass = self.rearm_lock.lock().await;
        if !self.started.load(Ordering::Acquire) {
            return Ok(());
        }
        let next = self.store.find_minimum_date().await?;
        let now = self.clock.now();
        let weak = Arc::downgrade(self);
        self.timer.replace(next, |generation, target| {
            let delay = delay_until(target, now);
            debug!(%target, delay_ms = delay.as_millis() as u64, "next wake-up");
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // Dropped scheduler: nothing left to fire for.
                if let Some(inner) = weak.upgrade() {
                    inner.fire(generation, target).await;
                }
            })
        });
        Ok(())
    }

    /// One claim cycle. Boxed because it re-enters `rearm`, which spawns it.
    fn fire(self: Arc<Self>, generation: u64, target: DateTime<Utc>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !self.timer.release(generation) {
                debug!(generation, "stale wake-up ignored");
                return;
            }
            if let Err(err) = self.claim_and_dispatch(target).await {
                self.report(err);
            }
            self.rearm().await;
        })
    }

    async fn claim_and_dispatch(&self, date: DateTime<Utc>) -> Result<()> {
        let Some(job) = self.store.claim_by_date(date).await? else {
            debug!(%date, "nothing left to claim");
            return Ok(());
        };

        let handler = if job.recurrent {
            let handler = self
                .registry
                .read()
                .expect("handler registry poisoned")
                .recurring_handler(&job.name);
            match handler {
                Some(handler) => handler,
                None => {
                    debug!(name = %job.name, "no recurring handler, occurrence skipped");
                    return Ok(());
                }
            }
        } else {
            self.handler(&job.name)
                .ok_or_else(|| SchedulerError::UnknownJob {
                    name: job.name.clone(),
                })?
        };

        self.dispatch(job, handler);
        Ok(())
    }

    /// Run `handler` on its own task; its outcome only ever reaches the sink.
    fn dispatch(&self, job: Job, handler: Handler) {
        let Job { id, name, date, data, .. } = job;
        info!(job_id = %id, %name, %date, "dispatching job");
        let sink = Arc::clone(&self.error_sink);
        tokio::spawn(async move {
            match run_handler(&name, handler, data, date).await {
                Ok(()) => debug!(job_id = %id, %name, "job completed"),
                Err(err) => {
                    warn!(job_id = %id, %name, "job failed");
                    sink(err);
                }
            }
        });
    }
}

/// Await `handler` on a separate task so panics surface as errors.
pub(crate) async fn run_handler(
    name: &str,
    handler: Handler,
    data: Value,
    date: DateTime<Utc>,
) -> Result<()> {
    match tokio::spawn(async move { handler(data, date).await }).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(SchedulerError::Handler {
            name: name.to_string(),
            source: err.into(),
        }),
        Err(join) => Err(SchedulerError::HandlerPanicked {
            name: name.to_string(),
            message: panic_message(join),
        }),
    }
}

fn panic_message(join: tokio::task::JoinError) -> String {
    if !join.is_panic() {
        return join.to_string();
    }
    let payload = join.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
