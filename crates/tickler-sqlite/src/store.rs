use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tickler_scheduler::{Job, JobFilter, JobStore, StoreError};
use tracing::debug;
use uuid::Uuid;

use crate::db::{ensure_date_index, init_db};

const COLUMNS: &str = "id, name, date, data, recurrent";

// `?1` is the name, `?2` the recurrent flag; NULL leaves the column free.
const FILTER_CLAUSE: &str = "(?1 IS NULL OR name = ?1) AND (?2 IS NULL OR recurrent = ?2)";

/// Durable [`JobStore`] over a single SQLite connection.
///
/// Every statement runs while holding the connection lock, so one store is
/// safe to share between scheduler instances of the same process. Separate
/// processes coordinate through SQLite itself: the claim is a single
/// `DELETE … RETURNING`, which no two connections can both win.
pub struct SqliteJobStore {
    conn: Mutex<Connection>,
}

impl SqliteJobStore {
    /// Wrap `conn`, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self, StoreError> {
        init_db(&conn).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("sqlite job store lock poisoned".into()))
    }
}

impl std::fmt::Debug for SqliteJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteJobStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn ensure_date_index(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;
        ensure_date_index(&conn).map_err(backend)
    }

    async fn insert_one(&self, job: &Job) -> Result<(), StoreError> {
        let conn = self.conn()?;
        insert(&conn, job)?;
        Ok(())
    }

    async fn insert_many(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        for job in jobs {
            insert(&tx, job)?;
        }
        tx.commit().map_err(backend)
    }

    async fn find_minimum_date(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn()?;
        let millis: Option<i64> = conn
            .query_row("SELECT MIN(date) FROM jobs", [], |row| row.get(0))
            .map_err(backend)?;
        millis.map(|ms| from_millis("MIN(date)", ms)).transpose()
    }

    async fn claim_by_date(&self, date: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let conn = self.conn()?;
        let claimed = conn
            .query_row(
                &format!(
                    "DELETE FROM jobs
                     WHERE id = (SELECT id FROM jobs WHERE date = ?1 ORDER BY rowid LIMIT 1)
                     RETURNING {COLUMNS}"
                ),
                [date.timestamp_millis()],
                RawJob::from_row,
            )
            .optional()
            .map_err(backend)?;
        if let Some(raw) = &claimed {
            debug!(job_id = %raw.id, name = %raw.name, "job claimed");
        }
        claimed.map(RawJob::into_job).transpose()
    }

    async fn delete_matching(&self, filter: &JobFilter) -> Result<u64, StoreError> {
        let mut conn = self.conn()?;
        if filter.data.is_none() {
            let removed = conn
                .execute(
                    &format!("DELETE FROM jobs WHERE {FILTER_CLAUSE}"),
                    params![filter.name, filter.recurrent],
                )
                .map_err(backend)?;
            return Ok(removed as u64);
        }

        // Payload paths are matched in Rust; select and delete under one
        // write lock so nothing changes in between.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        let doomed = select_matching(&tx, filter)?;
        let mut removed = 0;
        {
            let mut stmt = tx
                .prepare("DELETE FROM jobs WHERE id = ?1")
                .map_err(backend)?;
            for job in &doomed {
                removed += stmt.execute([job.id.to_string()]).map_err(backend)? as u64;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(removed)
    }

    async fn find_matching(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let conn = self.conn()?;
        select_matching(&conn, filter)
    }

    async fn upsert_recurring_definition(
        &self,
        name: &str,
        date: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let job = Job::recurring(name, date);
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                &format!(
                    "INSERT INTO jobs ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, 1)
                     ON CONFLICT DO NOTHING"
                ),
                params![
                    job.id.to_string(),
                    job.name,
                    job.date.timestamp_millis(),
                    serde_json::to_string(&job.data)?,
                ],
            )
            .map_err(backend)?;
        Ok(inserted == 1)
    }
}

fn insert(conn: &Connection, job: &Job) -> Result<usize, StoreError> {
    conn.execute(
        &format!("INSERT INTO jobs ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
        params![
            job.id.to_string(),
            job.name,
            job.date.timestamp_millis(),
            serde_json::to_string(&job.data)?,
            job.recurrent,
        ],
    )
    .map_err(backend)
}

/// Rows matching `filter`, ordered by due date then insertion.
///
/// Name and flag are pushed into SQL; payload paths are checked per row.
fn select_matching(conn: &Connection, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM jobs WHERE {FILTER_CLAUSE} ORDER BY date, rowid"
        ))
        .map_err(backend)?;
    let rows = stmt
        .query_map(params![filter.name, filter.recurrent], RawJob::from_row)
        .map_err(backend)?;

    let mut jobs = Vec::new();
    for raw in rows {
        let job = raw.map_err(backend)?.into_job()?;
        if filter.matches(&job) {
            jobs.push(job);
        }
    }
    Ok(jobs)
}

/// A `jobs` row before its columns are validated.
struct RawJob {
    id: String,
    name: String,
    date: i64,
    data: String,
    recurrent: bool,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            date: row.get(2)?,
            data: row.get(3)?,
            recurrent: row.get(4)?,
        })
    }

    fn into_job(self) -> Result<Job, StoreError> {
        let id = Uuid::parse_str(&self.id).map_err(|e| StoreError::Corrupt {
            id: self.id.clone(),
            reason: e.to_string(),
        })?;
        let date = from_millis(&self.id, self.date)?;
        let data = serde_json::from_str(&self.data)?;
        Ok(Job {
            id,
            name: self.name,
            date,
            data,
            recurrent: self.recurrent,
        })
    }
}

fn from_millis(id: &str, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| StoreError::Corrupt {
        id: id.to_string(),
        reason: format!("date {millis} is out of range"),
    })
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn store() -> SqliteJobStore {
        SqliteJobStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn minimum_date_follows_inserts_and_claims() {
        let store = store();
        store.ensure_date_index().await.unwrap();
        assert_eq!(store.find_minimum_date().await.unwrap(), None);

        let now = Utc::now();
        let late = Job::new("t", now + Duration::seconds(2), json!(1));
        let early = Job::new("t", now + Duration::seconds(1), json!(2));
        store.insert_many(&[late.clone(), early.clone()]).await.unwrap();
        assert_eq!(store.find_minimum_date().await.unwrap(), Some(early.date));

        assert_eq!(store.claim_by_date(early.date).await.unwrap(), Some(early));
        assert_eq!(store.find_minimum_date().await.unwrap(), Some(late.date));
    }

    #[tokio::test]
    async fn claim_returns_the_record_once() {
        let store = store();
        let job = Job::new("mail", Utc::now(), json!({"to": "a@b.c", "tries": [1, 2]}));
        store.insert_one(&job).await.unwrap();

        assert_eq!(store.claim_by_date(job.date).await.unwrap(), Some(job.clone()));
        assert_eq!(store.claim_by_date(job.date).await.unwrap(), None);
    }

    #[tokio::test]
    async fn claim_takes_oldest_of_same_date() {
        let store = store();
        let date = Utc::now();
        for data in ["first", "second", "third"] {
            store.insert_one(&Job::new("t", date, json!(data))).await.unwrap();
        }
        let date = Job::new("t", date, json!(null)).date;

        for expected in ["first", "second", "third"] {
            let claimed = store.claim_by_date(date).await.unwrap().unwrap();
            assert_eq!(claimed.data, json!(expected));
        }
        assert_eq!(store.claim_by_date(date).await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_by_name_and_payload_path() {
        let store = store();
        let now = Utc::now();
        store
            .insert_many(&[
                Job::new("a", now, json!({"user": {"id": 1}, "kind": "x"})),
                Job::new("a", now, json!({"user": {"id": 2}, "kind": "x"})),
                Job::new("b", now, json!({"user": {"id": 1}})),
            ])
            .await
            .unwrap();

        let filter = JobFilter::by_name("a").with_data(json!({"user": {"id": 1}}));
        assert_eq!(store.delete_matching(&filter).await.unwrap(), 1);
        assert_eq!(store.delete_matching(&filter).await.unwrap(), 0);

        assert_eq!(store.delete_matching(&JobFilter::by_name("a")).await.unwrap(), 1);
        let left = store.find_matching(&JobFilter::all()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "b");
    }

    #[tokio::test]
    async fn find_orders_by_date() {
        let store = store();
        let now = Utc::now();
        store
            .insert_many(&[
                Job::new("t", now + Duration::seconds(3), json!(3)),
                Job::new("t", now + Duration::seconds(1), json!(1)),
                Job::new("t", now + Duration::seconds(2), json!(2)),
            ])
            .await
            .unwrap();

        let found = store.find_matching(&JobFilter::by_name("t")).await.unwrap();
        let order: Vec<_> = found.iter().map(|job| job.data.clone()).collect();
        assert_eq!(order, vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn recurring_upsert_inserts_once_per_name() {
        let store = store();
        let date = Utc::now() + Duration::seconds(1);
        assert!(store.upsert_recurring_definition("beat", date).await.unwrap());
        assert!(!store.upsert_recurring_definition("beat", date).await.unwrap());
        assert!(store.upsert_recurring_definition("other", date).await.unwrap());

        // A plain job of the same name does not count as the occurrence.
        store.insert_one(&Job::new("beat", date, json!(null))).await.unwrap();
        let beats = store
            .find_matching(&JobFilter::by_name("beat").with_recurrent(true))
            .await
            .unwrap();
        assert_eq!(beats.len(), 1);
        assert_eq!(beats[0].data, json!(null));
    }

    #[tokio::test]
    async fn corrupt_rows_surface_as_errors() {
        let store = store();
        store
            .conn()
            .unwrap()
            .execute(
                "INSERT INTO jobs (id, name, date, data, recurrent) VALUES ('nope', 't', 0, 'null', 0)",
                [],
            )
            .unwrap();

        match store.find_matching(&JobFilter::all()).await {
            Err(StoreError::Corrupt { id, .. }) => assert_eq!(id, "nope"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
