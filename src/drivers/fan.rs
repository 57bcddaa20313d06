//! Fan implementations.
//!
//! `PwmFan` writes its power to an hwmon-style duty file (0-255). The
//! configured idle floor keeps a minimum airflow over the heating element
//! without running the fan at full tilt.

use std::path::PathBuf;

use log::{debug, warn};

use crate::drivers::{DeviceFile, Fan, duty_from_power};
use crate::error::ActuatorError;

/// PWM fan on a duty file.
pub struct PwmFan {
    device: DeviceFile,
    idle_power: f64,
    power: f64,
    destroyed: bool,
}

impl PwmFan {
    /// Bind the fan and settle it at its idle floor.
    pub fn new(
        device: impl Into<PathBuf>,
        frequency_hz: u32,
        idle_power: f64,
    ) -> Result<Self, ActuatorError> {
        let mut fan = Self {
            device: DeviceFile::new(device),
            idle_power,
            power: 0.0,
            destroyed: false,
        };
        // The kernel driver owns the pwm frequency for duty-file fans.
        debug!("fan on {:?}: configured frequency {frequency_hz} Hz", fan.device.path);
        fan.idle()?;
        Ok(fan)
    }
}

impl Fan for PwmFan {
    fn set_power(&mut self, power: f64) -> Result<(), ActuatorError> {
        let power = power.clamp(0.0, 100.0);
        self.device.write(duty_from_power(power))?;
        self.power = power;
        debug!("fan on {:?} set to {power:.1}%", self.device.path);
        Ok(())
    }

    fn power(&self) -> f64 {
        self.power
    }

    fn idle_power(&self) -> f64 {
        self.idle_power
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(err) = self.set_power(0.0) {
            warn!("releasing fan: {err}");
        }
    }
}

/// In-memory fan.
pub struct DummyFan {
    idle_power: f64,
    power: f64,
}

impl DummyFan {
    pub fn new(idle_power: f64) -> Self {
        Self {
            idle_power,
            power: 0.0,
        }
    }
}

impl Fan for DummyFan {
    fn set_power(&mut self, power: f64) -> Result<(), ActuatorError> {
        self.power = power.clamp(0.0, 100.0);
        Ok(())
    }

    fn power(&self) -> f64 {
        self.power
    }

    fn idle_power(&self) -> f64 {
        self.idle_power
    }

    fn destroy(&mut self) {
        self.power = 0.0;
    }
}
