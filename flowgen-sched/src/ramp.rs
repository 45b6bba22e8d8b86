use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::wheel::{TimerHandle, TimerWheel};

/// Ramp configuration errors. Fatal and raised before the controller
/// exists.
#[derive(Debug, Error, PartialEq)]
pub enum RampError {
    #[error("ramp-up window must be longer than 1 second, got {0}")]
    WindowTooShort(u16),
    #[error("target rate must be positive and finite, got {0}")]
    InvalidTargetRate(f64),
}

/// Warm-up window and steady-state target for a [`RampController`].
#[derive(Debug, Clone, PartialEq)]
pub struct RampConfig {
    /// Warm-up window length in seconds. Must be greater than 1.
    pub rampup_secs: u16,
    /// Steady-state flow creation rate, connections per second.
    pub target_cps: f64,
}

impl RampConfig {
    pub fn validate(&self) -> Result<(), RampError> {
        if self.rampup_secs <= 1 {
            return Err(RampError::WindowTooShort(self.rampup_secs));
        }
        if !(self.target_cps > 0.0) || !self.target_cps.is_finite() {
            return Err(RampError::InvalidTargetRate(self.target_cps));
        }
        Ok(())
    }
}

/// Outcome of one ramp step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RampStep {
    /// Still warming up: apply the rate, re-arm the controller's timer one
    /// step period out.
    Ramping { rate: f64, interval: Duration },
    /// The target is reached and the controller's timer is released; the
    /// caller applies the final values and drops the controller.
    Steady { rate: f64, interval: Duration },
}

impl RampStep {
    /// Flow creation rate for this step, connections per second.
    pub fn rate(&self) -> f64 {
        match *self {
            Self::Ramping { rate, .. } | Self::Steady { rate, .. } => rate,
        }
    }

    /// Inter-arrival interval for this step.
    pub fn interval(&self) -> Duration {
        match *self {
            Self::Ramping { interval, .. } | Self::Steady { interval, .. } => interval,
        }
    }
}

/// Raises a flow creation rate from zero to a target over a warm-up
/// window, one step per second, self-paced by a timer it re-arms itself.
///
/// The derived inter-arrival interval is clamped to at most a quarter of
/// the warm-up window, bounding burstiness while the computed rate is
/// still very low. The state machine runs one way, RAMPING to STEADY, and
/// the controller self-terminates: on the final step it reports
/// [`RampStep::Steady`], releases its timer slot and is dropped by the
/// caller.
#[derive(Debug)]
pub struct RampController {
    tick: u16,
    total_ticks: u16,
    target_cps: f64,
    warm_up: Duration,
    timer: Option<TimerHandle>,
}

impl RampController {
    pub fn new(config: &RampConfig) -> Result<Self, RampError> {
        config.validate()?;
        Ok(Self {
            tick: 0,
            total_ticks: config.rampup_secs,
            target_cps: config.target_cps,
            warm_up: Duration::from_secs(config.rampup_secs as u64),
            timer: None,
        })
    }

    /// Whether the controller has finished ramping.
    pub fn is_steady(&self) -> bool {
        self.tick >= self.total_ticks
    }

    /// Records the wheel timer that will drive the next step. At most one
    /// timer may be outstanding per controller.
    pub fn arm(&mut self, handle: TimerHandle) {
        debug_assert!(self.timer.is_none(), "ramp timer armed twice");
        self.timer = Some(handle);
    }

    /// Releases the armed timer handle, if any. Called when the timer
    /// fires (the wheel no longer owns it) or before stopping it.
    pub fn disarm(&mut self) -> Option<TimerHandle> {
        self.timer.take()
    }

    /// Cancels the armed timer on `wheel`. Required before dropping a
    /// controller that is still ramping, so no fired timer can step a
    /// controller that no longer exists.
    pub fn stop<T>(&mut self, wheel: &mut TimerWheel<T>) -> Option<T> {
        self.disarm().and_then(|handle| wheel.stop(handle))
    }

    /// Advances the ramp one step and returns the rate and inter-arrival
    /// interval to apply until the next step.
    pub fn step(&mut self) -> RampStep {
        self.tick = (self.tick + 1).min(self.total_ticks);

        let rate = self.target_cps * self.tick as f64 / self.total_ticks as f64;
        let interval = Duration::from_secs_f64(1.0 / rate).min(self.warm_up / 4);

        if self.tick == self.total_ticks {
            debug!(rate, "ramp-up complete, entering steady state");
            RampStep::Steady { rate, interval }
        } else {
            RampStep::Ramping { rate, interval }
        }
    }
}

impl Drop for RampController {
    fn drop(&mut self) {
        // dropping with a live timer would let the wheel fire into freed
        // ramp state
        debug_assert!(self.timer.is_none(), "ramp controller dropped while its timer is armed");
    }
}
