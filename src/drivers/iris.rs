//! Ventilation iris implementations.
//!
//! The iris is a servo-actuated flap; its position command is the raw servo
//! pulse value from the configuration. `ServoIris` writes commands to the
//! configured device file, `DummyIris` tracks them in memory.

use std::path::PathBuf;

use log::{debug, warn};

use crate::drivers::{DeviceFile, VentIris};
use crate::error::ActuatorError;

/// Servo-driven iris on a device file.
pub struct ServoIris {
    device: DeviceFile,
    idle_position: f64,
    position: Option<f64>,
    destroyed: bool,
}

impl ServoIris {
    /// Bind the servo and park it at the idle position.
    pub fn new(device: impl Into<PathBuf>, idle_position: f64) -> Result<Self, ActuatorError> {
        let mut iris = Self {
            device: DeviceFile::new(device),
            idle_position,
            position: None,
            destroyed: false,
        };
        iris.set_open(idle_position)?;
        Ok(iris)
    }
}

impl VentIris for ServoIris {
    fn set_open(&mut self, position: f64) -> Result<(), ActuatorError> {
        self.device.write(position.round() as i64)?;
        self.position = Some(position);
        debug!("iris position set to {position:.0}");
        Ok(())
    }

    fn position(&self) -> Option<f64> {
        self.position
    }

    fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(err) = self.set_open(self.idle_position) {
            warn!("releasing iris: {err}");
        }
    }
}

/// In-memory iris.
#[derive(Default)]
pub struct DummyIris {
    position: Option<f64>,
}

impl DummyIris {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VentIris for DummyIris {
    fn set_open(&mut self, position: f64) -> Result<(), ActuatorError> {
        self.position = Some(position);
        Ok(())
    }

    fn position(&self) -> Option<f64> {
        self.position
    }

    fn destroy(&mut self) {
        self.position = None;
    }
}
