//! Unified error types for the chamber climate engine.
//!
//! A single [`Error`] enum that every subsystem converts into, keeping the
//! control tick's fault handling uniform: the tick wrapper catches any
//! variant, forces the heater to its safe state, and logs. No fault ever
//! reaches the host (see the engine module).

use std::path::PathBuf;

use thiserror::Error;

/// Every fallible operation in the crate funnels into this type.
#[derive(Debug, Error)]
pub enum Error {
    /// A sensor could not be read or returned unusable data.
    #[error("sensor: {0}")]
    Sensor(#[from] SensorError),
    /// An actuator command failed.
    #[error("actuator: {0}")]
    Actuator(#[from] ActuatorError),
    /// Configuration could not be turned into a working device set.
    #[error("config: {0}")]
    Config(String),
}

/// Sensor-side faults. Transient ones are retried inside the sampling loop
/// and surface to readers only as "no value".
#[derive(Debug, Error)]
pub enum SensorError {
    /// The backing device file could not be opened or read.
    #[error("device file {path:?} unreadable: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The device produced data but the integrity check failed.
    #[error("incomplete reading (CRC not confirmed)")]
    Incomplete,
    /// The device produced data that could not be parsed.
    #[error("malformed reading: {0}")]
    Malformed(String),
    /// No sampled value is available yet.
    #[error("no reading available")]
    NoReading,
}

/// Actuator-side faults.
#[derive(Debug, Error)]
pub enum ActuatorError {
    /// Writing the command value to the device file failed.
    #[error("write to {path:?} failed: {source}")]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Crate-wide `Result` alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
