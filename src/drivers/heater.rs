//! Heater implementations.
//!
//! `RelayHeater` drives a boolean relay through a GPIO value file with
//! configurable polarity: most chamber heater relays are wired active-low,
//! so "off" must map to the line's high level. `PwmHeater` drives a
//! continuous element through an hwmon-style duty file. `DummyHeater`
//! tracks state in memory for bring-up and tests.

use std::path::PathBuf;

use log::{debug, warn};

use crate::drivers::{DeviceFile, Heater, HeaterMode, duty_from_power};
use crate::error::ActuatorError;

/// Boolean relay heater on a GPIO value file.
pub struct RelayHeater {
    device: DeviceFile,
    active_low: bool,
    on: bool,
    destroyed: bool,
}

impl RelayHeater {
    /// Bind the relay and drive it to its safe off level.
    pub fn new(device: impl Into<PathBuf>, active_low: bool) -> Result<Self, ActuatorError> {
        let heater = Self {
            device: DeviceFile::new(device),
            active_low,
            on: false,
            destroyed: false,
        };
        heater.write_level(false)?;
        Ok(heater)
    }

    fn write_level(&self, on: bool) -> Result<(), ActuatorError> {
        // With an active-low relay the energized state is line level 0.
        let level = u8::from(on != self.active_low);
        self.device.write(level)
    }
}

impl Heater for RelayHeater {
    fn mode(&self) -> HeaterMode {
        HeaterMode::Relay
    }

    fn turn_on(&mut self) -> Result<(), ActuatorError> {
        self.write_level(true)?;
        self.on = true;
        debug!("heater turned on");
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        self.write_level(false)?;
        self.on = false;
        debug!("heater turned off");
        Ok(())
    }

    fn is_on(&self) -> bool {
        self.on
    }

    fn set_power(&mut self, _power: f64) -> Result<(), ActuatorError> {
        panic!("set_power called on a relay-mode heater");
    }

    fn power(&self) -> f64 {
        panic!("power called on a relay-mode heater");
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(err) = self.turn_off() {
            warn!("releasing relay heater: {err}");
        }
    }
}

/// Continuous heater element on a pwm duty file.
pub struct PwmHeater {
    device: DeviceFile,
    power: f64,
    destroyed: bool,
}

impl PwmHeater {
    /// Bind the element and drive it to zero power.
    pub fn new(device: impl Into<PathBuf>) -> Result<Self, ActuatorError> {
        let mut heater = Self {
            device: DeviceFile::new(device),
            power: 0.0,
            destroyed: false,
        };
        heater.set_power(0.0)?;
        Ok(heater)
    }
}

impl Heater for PwmHeater {
    fn mode(&self) -> HeaterMode {
        HeaterMode::Pwm
    }

    fn turn_on(&mut self) -> Result<(), ActuatorError> {
        panic!("turn_on called on a pwm-mode heater");
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        panic!("turn_off called on a pwm-mode heater");
    }

    fn is_on(&self) -> bool {
        panic!("is_on called on a pwm-mode heater");
    }

    fn set_power(&mut self, power: f64) -> Result<(), ActuatorError> {
        let power = power.clamp(0.0, 100.0);
        self.device.write(duty_from_power(power))?;
        self.power = power;
        debug!("heater power set to {power:.1}%");
        Ok(())
    }

    fn power(&self) -> f64 {
        self.power
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(err) = self.set_power(0.0) {
            warn!("releasing pwm heater: {err}");
        }
    }
}

/// In-memory heater for either discipline.
pub struct DummyHeater {
    mode: HeaterMode,
    on: bool,
    power: f64,
}

impl DummyHeater {
    pub fn new(mode: HeaterMode) -> Self {
        Self {
            mode,
            on: false,
            power: 0.0,
        }
    }
}

impl Heater for DummyHeater {
    fn mode(&self) -> HeaterMode {
        self.mode
    }

    fn turn_on(&mut self) -> Result<(), ActuatorError> {
        assert_eq!(self.mode, HeaterMode::Relay, "turn_on on a pwm-mode heater");
        self.on = true;
        Ok(())
    }

    fn turn_off(&mut self) -> Result<(), ActuatorError> {
        assert_eq!(self.mode, HeaterMode::Relay, "turn_off on a pwm-mode heater");
        self.on = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        assert_eq!(self.mode, HeaterMode::Relay, "is_on on a pwm-mode heater");
        self.on
    }

    fn set_power(&mut self, power: f64) -> Result<(), ActuatorError> {
        assert_eq!(self.mode, HeaterMode::Pwm, "set_power on a relay-mode heater");
        self.power = power.clamp(0.0, 100.0);
        Ok(())
    }

    fn power(&self) -> f64 {
        assert_eq!(self.mode, HeaterMode::Pwm, "power on a relay-mode heater");
        self.power
    }

    fn destroy(&mut self) {
        self.on = false;
        self.power = 0.0;
    }
}
