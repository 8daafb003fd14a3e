// Cancellable scheduled tasks backing reconnect and heartbeat

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Owns a spawned timer task; cancelling or dropping it aborts the task.
///
/// Each handle has a unique id that the timer passes to its callback, so a
/// firing that raced with cancellation can be recognised as stale.
#[derive(Debug)]
pub struct TimerHandle {
    id: u64,
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Run `fire` once after `delay`
    pub fn once<F>(delay: Duration, fire: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            sleep(delay).await;
            fire(id);
        });
        Self { id, task }
    }

    /// Run `tick` every `period`, first tick one period from now
    pub fn every<F>(period: Duration, tick: F) -> Self
    where
        F: Fn(u64) + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tick(id);
            }
        });
        Self { id, task }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
