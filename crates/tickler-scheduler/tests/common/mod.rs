// Shared fixtures for the scheduler integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tickler_scheduler::{
    Job, JobFilter, JobStore, MemoryJobStore, Scheduler, StoreError, TokioClock,
};
use tokio::sync::mpsc;

/// Memory store that counts minimum-date queries and can be told to fail them.
#[derive(Default)]
pub struct CountingStore {
    jobs: MemoryJobStore,
    minimum_queries: AtomicUsize,
    fail_minimum: AtomicBool,
}

impl CountingStore {
    pub fn minimum_queries(&self) -> usize {
        self.minimum_queries.load(Ordering::SeqCst)
    }

    pub fn fail_minimum(&self, fail: bool) {
        self.fail_minimum.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }
}

#[async_trait]
impl JobStore for CountingStore {
    async fn ensure_date_index(&self) -> Result<(), StoreError> {
        self.jobs.ensure_date_index().await
    }

    async fn insert_one(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.insert_one(job).await
    }

    async fn insert_many(&self, jobs: &[Job]) -> Result<(), StoreError> {
        self.jobs.insert_many(jobs).await
    }

    async fn find_minimum_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.minimum_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_minimum.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("aggregate error".into()));
        }
        self.jobs.find_minimum_date().await
    }

    async fn claim_by_date(&self, date: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        self.jobs.claim_by_date(date).await
    }

    async fn delete_matching(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        self.jobs.delete_matching(filter).await
    }

    async fn find_matching(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        self.jobs.find_matching(filter).await
    }

    async fn upsert_recurring_definition(
        &self,
        name: &str,
        date: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.jobs.upsert_recurring_definition(name, date).await
    }
}

/// Messages of every error handed to the scheduler's sink.
#[derive(Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<String>>>);

impl ErrorLog {
    pub fn messages(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub store: Arc<CountingStore>,
    pub errors: ErrorLog,
    pub clock: TokioClock,
}

pub fn harness() -> Harness {
    harness_on(Arc::new(CountingStore::default()))
}

/// Scheduler over `store`, driven by a paused-time clock, collecting errors.
pub fn harness_on(store: Arc<CountingStore>) -> Harness {
    let clock = TokioClock::new();
    let errors = ErrorLog::default();
    let log = errors.clone();
    let scheduler = Scheduler::builder(store.clone())
        .clock(clock)
        .error_sink(move |err| log.0.lock().unwrap().push(err.to_string()))
        .build();
    Harness {
        scheduler,
        store,
        errors,
        clock,
    }
}

/// Define `name` with a handler that forwards every invocation.
pub fn record(scheduler: &Scheduler, name: &str) -> mpsc::UnboundedReceiver<(Value, DateTime<Utc>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    scheduler.define(name, move |data, date| {
        let tx = tx.clone();
        async move {
            let _ = tx.send((data, date));
            anyhow::Ok(())
        }
    });
    rx
}

/// Let spawned work finish; advances paused time by one millisecond.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub fn ms(millis: i64) -> chrono::Duration {
    chrono::Duration::milliseconds(millis)
}
