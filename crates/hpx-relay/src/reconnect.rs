//! Reconnect delay schedule.
//!
//! The driver counts failed attempts since the last successful open and asks
//! for the delay before the next one. With `n` failures behind it the wait is
//! `min(initial_delay * factor^n, max_delay)`, so the defaults give
//! 1s, 2s, 4s, ... capped at 30s.

use std::time::Duration;

use rand::Rng;

/// The reconnect knobs of a [`WsConfig`](crate::websocket::WsConfig).
#[derive(Clone, Copy, Debug)]
pub(crate) struct BackoffConfig {
    pub(crate) initial_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) factor: f64,
    /// Share of the delay replaced by a uniform random draw, in `0.0..=1.0`.
    pub(crate) jitter: f64,
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("Initial reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.initial_delay {
            return Err("Max reconnect delay must be >= initial reconnect delay".to_string());
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err("Backoff factor must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Delay before reconnect attempt number `failures + 1`.
///
/// `failures` is the attempt counter kept by the connection driver; it resets
/// to zero whenever a socket opens.
pub(crate) fn calculate_backoff(config: BackoffConfig, failures: u32) -> Duration {
    let growth = config.factor.powf(f64::from(failures));
    // `growth` may be infinite; `min` keeps the seconds finite.
    let secs = (config.initial_delay.as_secs_f64() * growth).min(config.max_delay.as_secs_f64());
    let capped = Duration::from_secs_f64(secs);

    if config.jitter == 0.0 {
        return capped;
    }

    // Blend toward a random point in [0, capped]; never exceeds the cap.
    let draw = rand::rng().random_range(0.0..=1.0);
    capped.mul_f64(1.0 - config.jitter + draw * config.jitter)
}
