// Heartbeat monitor
// Liveness is judged by any inbound traffic; ping replies are not required

use super::timer::TimerHandle;
use crate::config::HeartbeatConfig;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    last_inbound: Option<Instant>,
    ticker: Option<TimerHandle>,
}

impl HeartbeatMonitor {
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_inbound: None,
            ticker: None,
        }
    }

    /// Begin ticking; the open itself counts as the latest inbound activity
    pub fn start<F>(&mut self, tick: F)
    where
        F: Fn(u64) + Send + 'static,
    {
        self.stop();
        self.last_inbound = Some(Instant::now());
        self.ticker = Some(TimerHandle::every(self.config.interval, tick));
    }

    pub fn stop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.cancel();
        }
    }

    /// True if `timer_id` belongs to the running ticker
    pub fn is_current(&self, timer_id: u64) -> bool {
        self.ticker.as_ref().map(TimerHandle::id) == Some(timer_id)
    }

    pub fn record_inbound(&mut self) {
        self.last_inbound = Some(Instant::now());
    }

    fn idle(&self) -> Duration {
        self.last_inbound
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Idle time, if it exceeds the staleness threshold
    pub fn stale_for(&self) -> Option<Duration> {
        let idle = self.idle();
        (idle > self.config.stale_threshold).then_some(idle)
    }

    pub fn threshold(&self) -> Duration {
        self.config.stale_threshold
    }
}
