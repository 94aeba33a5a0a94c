use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::debug;

/// The single outstanding wake-up of a scheduler.
///
/// States are Disarmed (`armed == None`) and Armed(target). Every `replace`
/// bumps the generation, so a task spawned for an older arm can tell it has
/// been superseded even if its abort has not landed yet.
pub(crate) struct WakeUpTimer {
    slot: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    armed: Option<Armed>,
}

struct Armed {
    target: DateTime<Utc>,
    handle: JoinHandle<()>,
}

impl WakeUpTimer {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Target of the armed wake-up, if any.
    pub(crate) fn target(&self) -> Option<DateTime<Utc>> {
        let slot = self.slot.lock().expect("wake-up timer poisoned");
        slot.armed.as_ref().map(|armed| armed.target)
    }

    /// Cancel the outstanding wake-up, then arm a new one for `target`.
    ///
    /// `spawn` receives the new generation and target and must return the
    /// task that sleeps until then; it is called with the slot locked.
    pub(crate) fn replace<F>(&self, target: Option<DateTime<Utc>>, spawn: F)
    where
        F: FnOnce(u64, DateTime<Utc>) -> JoinHandle<()>,
    {
        let mut slot = self.slot.lock().expect("wake-up timer poisoned");
        if let Some(previous) = slot.armed.take() {
            previous.handle.abort();
        }
        slot.generation += 1;
        if let Some(target) = target {
            let handle = spawn(slot.generation, target);
            slot.armed = Some(Armed { target, handle });
            debug!(%target, generation = slot.generation, "wake-up armed");
        } else {
            debug!(generation = slot.generation, "wake-up disarmed");
        }
    }

    /// Called by a fired wake-up before it runs its claim cycle.
    ///
    /// Returns `false` when `generation` was superseded; the caller must then
    /// do nothing. On `true` the slot is left Disarmed without aborting the
    /// caller, so the cycle's own re-arm cannot cancel it.
    pub(crate) fn release(&self, generation: u64) -> bool {
        let mut slot = self.slot.lock().expect("wake-up timer poisoned");
        if slot.generation != generation || slot.armed.is_none() {
            return false;
        }
        slot.armed = None;
        true
    }

    pub(crate) fn disarm(&self) {
        self.replace(None, |_, _| unreachable!("disarm never spawns"));
    }
}

impl Drop for WakeUpTimer {
    fn drop(&mut self) {
        if let Ok(slot) = self.slot.get_mut() {
            if let Some(armed) = slot.armed.take() {
                armed.handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sleeper() -> JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn replace_keeps_a_single_armed_target() {
        let timer = WakeUpTimer::new();
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(1);

        timer.replace(Some(first), |_, _| sleeper());
        timer.replace(Some(second), |_, _| sleeper());
        assert_eq!(timer.target(), Some(second));

        timer.disarm();
        assert_eq!(timer.target(), None);
    }

    #[tokio::test]
    async fn superseded_generation_cannot_release() {
        let timer = WakeUpTimer::new();
        let mut stale = 0;
        timer.replace(Some(Utc::now()), |generation, _| {
            stale = generation;
            sleeper()
        });
        let mut current = 0;
        timer.replace(Some(Utc::now()), |generation, _| {
            current = generation;
            sleeper()
        });

        assert!(!timer.release(stale));
        assert!(timer.release(current));
        assert_eq!(timer.target(), None);
        // Already released: a second release is a no-op.
        assert!(!timer.release(current));
    }

    #[tokio::test]
    async fn replacing_aborts_the_previous_task() {
        let timer = WakeUpTimer::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        timer.replace(Some(Utc::now()), |_, _| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                let _ = tx.send(());
            })
        });
        timer.replace(None, |_, _| unreachable!());

        // Sender dropped by the aborted task.
        assert!(rx.await.is_err());
    }
}
