//! DS18B20 1-wire temperature source.
//!
//! The kernel w1 driver exposes each attached probe as a directory under
//! `/sys/bus/w1/devices/<id>/` containing a `w1_slave` file of the form:
//!
//! ```text
//! 6e 01 4b 46 7f ff 02 10 71 : crc=71 YES
//! 6e 01 4b 46 7f ff 02 10 71 t=22875
//! ```
//!
//! The first line carries the CRC verdict; the second carries the reading
//! in millidegrees after the `t=` marker.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SensorError;
use crate::sensors::TemperatureSource;

/// Where the kernel mounts the 1-wire bus.
pub const DEFAULT_BASE_DIR: &str = "/sys/bus/w1/devices";

/// DS18B20 family prefix used for device discovery.
const FAMILY_PREFIX: &str = "28";

/// File-backed DS18B20 reader.
pub struct Ds18b20Source {
    device_id: String,
    device_file: PathBuf,
}

impl Ds18b20Source {
    pub fn new(device_id: &str) -> Self {
        Self::with_base_dir(DEFAULT_BASE_DIR, device_id)
    }

    /// Bind against a different bus directory (tests, bind mounts).
    pub fn with_base_dir(base_dir: impl AsRef<Path>, device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            device_file: base_dir.as_ref().join(device_id).join("w1_slave"),
        }
    }
}

impl TemperatureSource for Ds18b20Source {
    fn sample(&mut self) -> Result<f64, SensorError> {
        let raw = fs::read_to_string(&self.device_file).map_err(|source| {
            SensorError::Unreadable {
                path: self.device_file.clone(),
                source,
            }
        })?;
        parse_w1_payload(&raw)
    }

    fn describe(&self) -> String {
        format!("ds18b20 {}", self.device_id)
    }
}

/// Parse a `w1_slave` payload into degrees Celsius.
pub fn parse_w1_payload(raw: &str) -> Result<f64, SensorError> {
    let mut lines = raw.lines();
    let crc_line = lines.next().ok_or(SensorError::Incomplete)?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(SensorError::Incomplete);
    }
    let data_line = lines.next().ok_or(SensorError::Incomplete)?;
    let marker = data_line
        .find("t=")
        .ok_or_else(|| SensorError::Malformed(data_line.to_string()))?;
    let millidegrees: f64 = data_line[marker + 2..]
        .trim()
        .parse()
        .map_err(|_| SensorError::Malformed(data_line.to_string()))?;
    Ok(millidegrees / 1000.0)
}

/// List the ids of currently attached DS18B20 probes.
///
/// Read-only configuration aid; returns an empty list when the bus
/// directory does not exist (no 1-wire support on the host).
pub fn list_devices(base_dir: impl AsRef<Path>) -> Vec<String> {
    let Ok(entries) = fs::read_dir(base_dir.as_ref()) else {
        return Vec::new();
    };
    let mut ids: Vec<String> = entries
        .filter_map(|entry| {
            let name = entry.ok()?.file_name().into_string().ok()?;
            name.starts_with(FAMILY_PREFIX).then_some(name)
        })
        .collect();
    ids.sort();
    ids
}
