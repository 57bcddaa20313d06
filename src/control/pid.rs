//! PID controller for chamber temperature regulation.
//!
//! Proportional-integral-derivative controller with wall-clock sample-time
//! gating, conditional-integration anti-windup, output clamping, and an
//! auto/manual switch. Time is taken from `tokio::time::Instant` so paused
//! test clocks drive the controller the same way as the schedulers.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::PidConfig;

/// Last computed proportional/integral/derivative contributions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

/// PID controller.
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    setpoint: f64,
    sample_time: Duration,
    output_min: f64,
    output_max: f64,
    auto: bool,
    integral: f64,
    prev_error: Option<f64>,
    last_instant: Option<Instant>,
    last_output: f64,
    terms: PidTerms,
}

impl PidController {
    pub fn new(kp: f64, ki: f64, kd: f64, sample_time: Duration) -> Self {
        Self {
            kp,
            ki,
            kd,
            setpoint: 0.0,
            sample_time,
            output_min: 0.0,
            output_max: 100.0,
            auto: false,
            integral: 0.0,
            prev_error: None,
            last_instant: None,
            last_output: 0.0,
            terms: PidTerms::default(),
        }
    }

    pub fn from_config(cfg: &PidConfig) -> Self {
        let mut pid = Self::new(
            cfg.kp,
            cfg.ki,
            cfg.kd,
            Duration::from_secs_f64(cfg.sample_secs.max(0.0)),
        );
        pid.set_limits(cfg.output_min, cfg.output_max);
        pid
    }

    /// Update gains, sample time, and clamp bounds in place, preserving the
    /// accumulated state and time base (used when the engine rebuilds
    /// itself without replacing the controller).
    pub fn reconfigure(&mut self, cfg: &PidConfig) {
        self.kp = cfg.kp;
        self.ki = cfg.ki;
        self.kd = cfg.kd;
        self.sample_time = Duration::from_secs_f64(cfg.sample_secs.max(0.0));
        self.set_limits(cfg.output_min, cfg.output_max);
    }

    /// Set output clamp bounds.
    pub fn set_limits(&mut self, min: f64, max: f64) {
        self.output_min = min;
        self.output_max = max;
    }

    /// Update the target value.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Switch between automatic and manual operation.
    ///
    /// Manual freezes the output at its last value and stops the integral
    /// from accumulating. Re-enabling clears the accumulators and the time
    /// base so time spent disabled cannot wind the controller up.
    pub fn set_auto_mode(&mut self, enabled: bool) {
        if enabled && !self.auto {
            self.integral = 0.0;
            self.prev_error = None;
            self.last_instant = None;
        }
        self.auto = enabled;
    }

    pub fn is_auto(&self) -> bool {
        self.auto
    }

    /// Compute the controller output for a new measurement.
    ///
    /// Returns the previous output unchanged when less than one sample time
    /// has elapsed since the last update, or while in manual mode.
    pub fn compute(&mut self, measurement: f64) -> f64 {
        self.compute_at(measurement, Instant::now())
    }

    fn compute_at(&mut self, measurement: f64, now: Instant) -> f64 {
        if !self.auto {
            return self.last_output;
        }

        let dt = match self.last_instant {
            Some(prev) => {
                let elapsed = now.saturating_duration_since(prev);
                if elapsed < self.sample_time {
                    return self.last_output;
                }
                elapsed.as_secs_f64()
            }
            None => self.sample_time.as_secs_f64(),
        };

        let error = self.setpoint - measurement;

        let p = self.kp * error;

        self.integral += error * dt;
        let i = self.ki * self.integral;

        let derivative = match self.prev_error {
            Some(prev) if dt > 0.0 => (error - prev) / dt,
            _ => 0.0,
        };
        let d = self.kd * derivative;

        let raw = p + i + d;
        let output = raw.clamp(self.output_min, self.output_max);

        // Anti-windup: while saturated, back the last contribution out.
        if output != raw {
            self.integral -= error * dt;
        }

        self.prev_error = Some(error);
        self.last_instant = Some(now);
        self.terms = PidTerms { p, i, d };
        self.last_output = output;
        output
    }

    /// Last computed output.
    pub fn output(&self) -> f64 {
        self.last_output
    }

    /// Last computed term contributions, for diagnostics.
    pub fn terms(&self) -> PidTerms {
        self.terms
    }

    /// Clear accumulated state.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
        self.last_instant = None;
        self.terms = PidTerms::default();
    }
}
