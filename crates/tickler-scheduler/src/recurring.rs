use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    engine::{run_handler, Inner, Scheduler},
    error::{Result, SchedulerError},
    registry::{Handler, HandlerFuture},
    types::truncate_to_millis,
};

/// Computes the next occurrence of a recurring job.
pub type NextDateFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

impl Scheduler {
    /// Keep one occurrence of recurring job `name` scheduled at all times.
    ///
    /// When the stored occurrence fires, the plain handler defined under
    /// `name` runs, then the next occurrence is computed with `next_date` and
    /// stored. Calling `every` again while an occurrence is pending is a
    /// no-op, so it is safe to call on every process start.
    ///
    /// Returns `true` when a new occurrence was stored.
    pub async fn every<F>(&self, name: impl Into<String>, next_date: F) -> Result<bool>
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        renew(&self.inner, name.into(), Arc::new(next_date)).await
    }
}

async fn renew(inner: &Arc<Inner>, name: String, next_date: NextDateFn) -> Result<bool> {
    let wrapper = renewing_handler(Arc::downgrade(inner), name.clone(), Arc::clone(&next_date));
    inner.registry_mut().define_recurring(name.clone(), wrapper);

    let date = truncate_to_millis(next_date());
    if date <= inner.clock.now() {
        return Err(SchedulerError::RecurringDateNotInFuture { name, date });
    }

    let inserted = inner.store().upsert_recurring_definition(&name, date).await?;
    if inserted {
        info!(%name, %date, "recurring job scheduled");
        inner.rearm().await;
    } else {
        debug!(%name, "recurring job already scheduled");
    }
    Ok(inserted)
}

/// Handler stored for a recurring occurrence: run the plain handler, then
/// schedule the next occurrence whatever the outcome.
fn renewing_handler(inner: Weak<Inner>, name: String, next_date: NextDateFn) -> Handler {
    Arc::new(move |data: Value, date: DateTime<Utc>| -> HandlerFuture {
        let inner = Weak::clone(&inner);
        let name = name.clone();
        let next_date = Arc::clone(&next_date);
        Box::pin(async move {
            let Some(inner) = inner.upgrade() else {
                return Ok(());
            };

            match inner.handler(&name) {
                Some(handler) => {
                    if let Err(err) = run_handler(&name, handler, data, date).await {
                        inner.report(err);
                    }
                }
                None => inner.report(SchedulerError::UnknownJob { name: name.clone() }),
            }

            if let Err(err) = renew(&inner, name, next_date).await {
                inner.report(err);
            }
            Ok(())
        })
    })
}
