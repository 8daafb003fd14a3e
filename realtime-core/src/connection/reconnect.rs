// Reconnect scheduling with jittered exponential backoff

use super::timer::TimerHandle;
use crate::config::ReconnectConfig;
use rand::Rng;
use std::time::Duration;

/// `min(max_delay, initial_delay * 2^attempt)` before jitter
pub fn base_delay(config: &ReconnectConfig, attempt: u32) -> Duration {
    let initial_ms = config.initial_delay.as_secs_f64() * 1000.0;
    let max_ms = config.max_delay.as_secs_f64() * 1000.0;
    let exponential = initial_ms * 2f64.powi(attempt.min(1023) as i32);
    Duration::from_secs_f64(exponential.min(max_ms).max(0.0) / 1000.0)
}

/// Uniform sample from `[base * (1 - ratio), base * (1 + ratio)]`, never negative
pub fn jittered_delay<R: Rng + ?Sized>(
    config: &ReconnectConfig,
    attempt: u32,
    rng: &mut R,
) -> Duration {
    let base_ms = base_delay(config, attempt).as_secs_f64() * 1000.0;
    let ratio = config.jitter_ratio.clamp(0.0, 1.0);

    let low = (base_ms * (1.0 - ratio)).max(0.0);
    let high = (base_ms * (1.0 + ratio)).max(low);
    let sampled = if high > low { rng.gen_range(low..=high) } else { low };

    Duration::from_secs_f64(sampled / 1000.0)
}

/// Arms at most one reconnect timer and tracks the attempt counter
#[derive(Debug)]
pub struct ReconnectScheduler {
    config: ReconnectConfig,
    attempt: u32,
    pending: Option<TimerHandle>,
}

impl ReconnectScheduler {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            attempt: 0,
            pending: None,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Called on a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.cancel();
        }
    }

    /// Arm the timer for the current attempt, replacing any pending one.
    ///
    /// Returns the chosen delay.
    pub fn arm<F>(&mut self, fire: F) -> Duration
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        let delay = jittered_delay(&self.config, self.attempt, &mut rand::thread_rng());
        self.pending = Some(TimerHandle::once(delay, fire));
        delay
    }

    /// Accept a firing from timer `timer_id`.
    ///
    /// Returns false for stale timers; otherwise clears the pending handle
    /// and bumps the attempt counter.
    pub fn take_fired(&mut self, timer_id: u64) -> bool {
        match &self.pending {
            Some(timer) if timer.id() == timer_id => {
                self.pending = None;
                self.attempt = self.attempt.saturating_add(1);
                true
            }
            _ => false,
        }
    }
}
