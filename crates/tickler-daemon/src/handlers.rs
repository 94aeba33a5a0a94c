use chrono::{DateTime, Utc};
use serde_json::Value;
use tickler_scheduler::Scheduler;
use tracing::info;

/// Job name of the built-in heartbeat.
pub const HEARTBEAT: &str = "heartbeat";

/// Job name whose payload is written to the log when it fires.
pub const LOG: &str = "log";

/// Register the handlers every `tickler run` process serves.
pub fn register(scheduler: &Scheduler) {
    scheduler.define(LOG, |data: Value, date: DateTime<Utc>| async move {
        info!(%date, %data, "log job fired");
        anyhow::Ok(())
    });
    scheduler.define(HEARTBEAT, |_, date: DateTime<Utc>| async move {
        info!(%date, "heartbeat");
        anyhow::Ok(())
    });
}
