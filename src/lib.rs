//! Chamber climate control engine.
//!
//! Regulates the temperature of an enclosed printer chamber by driving a
//! resistive heater, two forced-air fans, and a servo-actuated ventilation
//! iris from periodic digital temperature probe readings. The host
//! integration layer feeds in settings, print-state events, and intercepted
//! commands; the engine owns everything else: sampling tasks, the periodic
//! control tick, PID, hysteresis, and fault containment.
//!
//! Construction and `start`/`reset` must run inside a tokio runtime; the
//! background tasks live on it.

#![deny(unused_must_use)]

pub mod config;
pub mod control;
pub mod drivers;
pub mod engine;
pub mod events;
pub mod scheduler;
pub mod sensors;
pub mod settings;

mod error;

pub use engine::{CHAMBER_READING_KEY, ClimateEngine, DeviceFactory, TemperatureMap};
pub use error::{ActuatorError, Error, Result, SensorError};
pub use events::PrinterEvent;
pub use settings::Settings;
