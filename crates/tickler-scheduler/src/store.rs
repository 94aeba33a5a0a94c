use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::StoreError,
    types::{Job, JobFilter},
};

/// Durable collection of [`Job`] records consumed by the scheduler.
///
/// Implementations must be `Send + Sync` so one store can be shared by several
/// scheduler instances, possibly in different processes.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Prepare efficient minimum and equality lookups on `date`. Idempotent.
    async fn ensure_date_index(&self) -> Result<(), StoreError>;

    async fn insert_one(&self, job: &Job) -> Result<(), StoreError>;

    async fn insert_many(&self, jobs: &[Job]) -> Result<(), StoreError>;

    /// Smallest `date` among all stored jobs, `None` when the store is empty.
    async fn find_minimum_date(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Atomically remove and return one job due exactly at `date`.
    ///
    /// Two concurrent callers must never both receive `Some` for the same
    /// record. When several jobs share the date, the earliest inserted one is
    /// taken.
    async fn claim_by_date(&self, date: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// Delete every job matching `filter`, returning how many were removed.
    async fn delete_matching(&self, filter: &JobFilter) -> Result<u64, StoreError>;

    /// Jobs matching `filter`, ordered by due date.
    async fn find_matching(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    /// Insert the occurrence of recurring job `name` unless one is already
    /// stored. Returns `true` when a record was inserted.
    async fn upsert_recurring_definition(
        &self,
        name: &str,
        date: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// In-process [`JobStore`] backed by a vector kept in insertion order.
///
/// Nothing survives a restart; use it for tests and for embedding the
/// scheduler where durability is handled elsewhere.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored jobs.
    pub fn len(&self) -> usize {
        self.jobs.lock().map(|jobs| jobs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn jobs(&self) -> Result<MutexGuard<'_, Vec<Job>>, StoreError> {
        self.jobs
            .lock()
            .map_err(|_| StoreError::Backend("memory job store lock poisoned".into()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn ensure_date_index(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_one(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs()?.push(job.clone());
        Ok(())
    }

    async fn insert_many(&self, jobs: &[Job]) -> Result<(), StoreError> {
        self.jobs()?.extend_from_slice(jobs);
        Ok(())
    }

    async fn find_minimum_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.jobs()?.iter().map(|job| job.date).min())
    }

    async fn claim_by_date(&self, date: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let mut jobs = self.jobs()?;
        Ok(jobs
            .iter()
            .position(|job| job.date == date)
            .map(|index| jobs.remove(index)))
    }

    async fn delete_matching(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        let mut jobs = self.jobs()?;
        let before = jobs.len();
        jobs.retain(|job| !filter.matches(job));
        Ok((before - jobs.len()) as u64)
    }

    async fn find_matching(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut found: Vec<Job> = self
            .jobs()?
            .iter()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal dates.
        found.sort_by_key(|job| job.date);
        Ok(found)
    }

    async fn upsert_recurring_definition(
        &self,
        name: &str,
        date: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs()?;
        if jobs.iter().any(|job| job.recurrent && job.name == name) {
            return Ok(false);
        }
        jobs.push(Job::recurring(name, date));
        Ok(true)
    }
}
