//! Configuration and top-level errors shared by the tickler binaries.

pub mod config;
pub mod error;

pub use config::{DatabaseConfig, SchedulerConfig, TicklerConfig};
pub use error::{Result, TicklerError};
