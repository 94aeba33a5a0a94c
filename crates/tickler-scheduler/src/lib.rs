//! `tickler-scheduler` — single-timer, store-backed job scheduler.
//!
//! # Overview
//!
//! Jobs live only in a [`store::JobStore`]. A [`Scheduler`] keeps exactly one
//! wake-up armed for the earliest stored due date. When it fires, the job due
//! at that date is atomically claimed (removed) from the store, its handler is
//! spawned without being awaited, and the next wake-up is recomputed from the
//! store, whatever happened to the claim or the handler.
//!
//! Because the claim is atomic, several schedulers may share one store: for a
//! given job exactly one of them receives it.
//!
//! # Operations
//!
//! | Operation     | Effect                                                 |
//! |---------------|--------------------------------------------------------|
//! | `start`       | Ensure the date index, arm the first wake-up           |
//! | `define`      | Register the handler for a job name                    |
//! | `submit`      | Validate the due date, persist, re-arm                 |
//! | `submit_many` | Same, with a single insert and a single re-arm         |
//! | `cancel`      | Delete matching jobs, re-arm if anything was removed   |
//! | `find`        | Read-only lookup                                       |
//! | `every`       | Keep one occurrence of a recurring job scheduled       |
//! | `refresh`     | Re-arm from the store after writes by other instances  |

pub mod clock;
pub mod engine;
pub mod error;
pub mod recurring;
pub mod registry;
pub mod store;
mod timer;
pub mod types;

pub use clock::{Clock, SystemClock, TokioClock};
pub use engine::{ErrorSink, Scheduler, SchedulerBuilder};
pub use error::{BoxError, Result, SchedulerError, StoreError};
pub use recurring::NextDateFn;
pub use registry::{Handler, HandlerFuture, HandlerRegistry};
pub use store::{JobStore, MemoryJobStore};
pub use types::{DueDate, Job, JobFilter, NewJob};
