//! `tickler-sqlite` — [`JobStore`](tickler_scheduler::JobStore) on SQLite.
//!
//! Jobs are rows of a single `jobs` table. Due dates are stored as integer
//! milliseconds since the Unix epoch so that the minimum-date aggregate and the
//! equality claim both run on the `idx_jobs_date` index. A partial unique
//! index on `name WHERE recurrent = 1` keeps at most one pending occurrence
//! per recurring job, even with several processes sharing the database file.

pub mod db;
pub mod store;

pub use db::init_db;
pub use store::SqliteJobStore;
