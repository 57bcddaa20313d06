//! Typed engine configuration.
//!
//! All tunable parameters for the chamber climate engine, assembled from the
//! host [`Settings`](crate::settings::Settings) tree with per-key defaults.
//! Out-of-range values are accepted at face value; safety clamps live at the
//! actuator boundary so the system stays controllable.

use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// Which implementation family the device factory instantiates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
    /// In-memory devices (bring-up, host without wired hardware, tests).
    Dummy,
    /// File-backed devices (1-wire sysfs probes, pwm/gpio value files).
    Device,
}

/// Control loop tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Control tick period (seconds).
    pub period_secs: f64,
    /// Relay hysteresis deadband below the setpoint (Celsius).
    pub hysteresis_c: f64,
    /// Targets above this run the heating regime (Celsius).
    pub heating_min_target_c: f64,
    /// Targets at/below this run active cooling while printing (Celsius).
    pub cooling_max_target_c: f64,
    /// Setpoint substituted when a print ends (Celsius; 0 = fully off).
    pub post_print_target_c: f64,
    /// Chamber-over-ambient margin above which the heater fan keeps
    /// spinning to cool the element (Celsius).
    pub cooldown_high_margin_c: f64,
    /// Chamber-over-ambient margin below which the heater fan stops
    /// (Celsius).
    pub cooldown_low_margin_c: f64,
    /// Budget for a blocking chamber read during enrichment (seconds).
    pub read_timeout_secs: f64,
}

/// Heater drive discipline plus its device binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum HeaterDrive {
    /// Boolean relay on a GPIO value file. `active_low` selects the wiring
    /// polarity so "off" is always the safe physical level.
    Relay { device: String, active_low: bool },
    /// Continuous 0-100 power on a pwm duty file.
    Pwm { device: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaterConfig {
    pub drive: HeaterDrive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanConfig {
    /// Duty file the fan power is written to.
    pub device: String,
    /// Configured PWM frequency (Hz). The file backend's frequency is owned
    /// by the kernel driver; the value is logged at construction.
    pub frequency_hz: u32,
    /// Resting power distinct from full off (0-100).
    pub idle_power: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisConfig {
    /// Device file the iris position (servo pulse value) is written to.
    pub device: String,
    /// Position for the open preset.
    pub open: f64,
    /// Position for the closed preset.
    pub closed: f64,
    /// Position for the idle preset.
    pub idle: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// 1-wire device identifier (e.g. `28-0301a279e1d3`).
    pub device_id: String,
    /// Sampling period (seconds).
    pub period_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Minimum elapsed time between PID updates (seconds).
    pub sample_secs: f64,
    /// Output clamp bounds. Bipolar by default: positive drives heating,
    /// negative drives cooling.
    pub output_min: f64,
    pub output_max: f64,
}

/// Full engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChamberConfig {
    pub backend: Backend,
    pub control: ControlConfig,
    pub heater: HeaterConfig,
    pub heater_fan: FanConfig,
    pub cooling_fan: FanConfig,
    pub iris: IrisConfig,
    pub chamber_probe: ProbeConfig,
    /// Optional second probe; without it the fallback ambient applies.
    pub ambient_probe: Option<ProbeConfig>,
    /// Ambient temperature assumed when no ambient probe reading exists.
    pub ambient_fallback_c: f64,
    pub pid: PidConfig,
}

impl Default for ChamberConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Dummy,
            control: ControlConfig {
                period_secs: 5.0,
                hysteresis_c: 2.5,
                heating_min_target_c: 40.0,
                cooling_max_target_c: 25.0,
                post_print_target_c: 28.0,
                cooldown_high_margin_c: 10.0,
                cooldown_low_margin_c: 3.0,
                read_timeout_secs: 5.0,
            },
            heater: HeaterConfig {
                drive: HeaterDrive::Relay {
                    device: "/sys/class/gpio/gpio17/value".into(),
                    active_low: true,
                },
            },
            heater_fan: FanConfig {
                device: "/sys/class/hwmon/hwmon0/pwm1".into(),
                frequency_hz: 25_000,
                idle_power: 10.0,
            },
            cooling_fan: FanConfig {
                device: "/sys/class/hwmon/hwmon0/pwm2".into(),
                frequency_hz: 25_000,
                idle_power: 10.0,
            },
            iris: IrisConfig {
                device: "/dev/chamber-iris".into(),
                open: 2500.0,
                closed: 500.0,
                idle: 1500.0,
            },
            chamber_probe: ProbeConfig {
                device_id: String::new(),
                period_secs: 1.0,
            },
            ambient_probe: None,
            ambient_fallback_c: 21.0,
            pid: PidConfig {
                kp: 10.0,
                ki: 0.1,
                kd: 1.0,
                sample_secs: 5.0,
                output_min: -100.0,
                output_max: 100.0,
            },
        }
    }
}

impl ChamberConfig {
    /// Assemble a configuration from the host settings tree, falling back
    /// to the defaults above for every absent key.
    pub fn from_settings(settings: &Settings) -> Self {
        let d = Self::default();

        let backend = match settings.get_str(&["backend"]) {
            Some("device") => Backend::Device,
            Some("dummy") | None => Backend::Dummy,
            Some(other) => {
                log::warn!("unknown backend '{other}', using dummy devices");
                Backend::Dummy
            }
        };

        let control = ControlConfig {
            period_secs: settings
                .get_float(&["frequency"])
                .unwrap_or(d.control.period_secs),
            hysteresis_c: settings
                .get_float(&["control", "hysteresis"])
                .unwrap_or(d.control.hysteresis_c),
            heating_min_target_c: settings
                .get_float(&["control", "heating_min_target"])
                .unwrap_or(d.control.heating_min_target_c),
            cooling_max_target_c: settings
                .get_float(&["control", "cooling_max_target"])
                .unwrap_or(d.control.cooling_max_target_c),
            post_print_target_c: settings
                .get_float(&["control", "post_print_target"])
                .unwrap_or(d.control.post_print_target_c),
            cooldown_high_margin_c: settings
                .get_float(&["control", "cooldown_high_margin"])
                .unwrap_or(d.control.cooldown_high_margin_c),
            cooldown_low_margin_c: settings
                .get_float(&["control", "cooldown_low_margin"])
                .unwrap_or(d.control.cooldown_low_margin_c),
            read_timeout_secs: settings
                .get_float(&["control", "read_timeout"])
                .unwrap_or(d.control.read_timeout_secs),
        };

        let heater = {
            let default_relay_device = "/sys/class/gpio/gpio17/value";
            let drive = match settings.get_str(&["heater", "mode"]) {
                Some("pwm") => HeaterDrive::Pwm {
                    device: settings
                        .get_str(&["heater", "pwm", "device"])
                        .unwrap_or("/sys/class/hwmon/hwmon0/pwm3")
                        .to_string(),
                },
                _ => HeaterDrive::Relay {
                    device: settings
                        .get_str(&["heater", "relay", "device"])
                        .unwrap_or(default_relay_device)
                        .to_string(),
                    active_low: settings
                        .get_bool(&["heater", "relay", "active_low"])
                        .unwrap_or(true),
                },
            };
            HeaterConfig { drive }
        };

        let fan = |key: &str, dflt: &FanConfig| FanConfig {
            device: settings
                .get_str(&[key, "pwm", "device"])
                .unwrap_or(&dflt.device)
                .to_string(),
            frequency_hz: settings
                .get_int(&[key, "pwm", "frequency"])
                .map_or(dflt.frequency_hz, |v| v as u32),
            idle_power: settings
                .get_float(&[key, "pwm", "idle_power"])
                .unwrap_or(dflt.idle_power),
        };

        let iris = IrisConfig {
            device: settings
                .get_str(&["iris", "servo", "device"])
                .unwrap_or(&d.iris.device)
                .to_string(),
            open: settings
                .get_float(&["iris", "servo", "open"])
                .unwrap_or(d.iris.open),
            closed: settings
                .get_float(&["iris", "servo", "closed"])
                .unwrap_or(d.iris.closed),
            idle: settings
                .get_float(&["iris", "servo", "idle"])
                .unwrap_or(d.iris.idle),
        };

        let chamber_probe = ProbeConfig {
            device_id: settings
                .get_str(&["temperature_sensor", "chamber", "device_id"])
                .unwrap_or_default()
                .to_string(),
            period_secs: settings
                .get_float(&["temperature_sensor", "chamber", "frequency"])
                .unwrap_or(d.chamber_probe.period_secs),
        };

        // The ambient probe exists only when a device id is configured.
        let ambient_probe = settings
            .get_str(&["temperature_sensor", "ambient", "device_id"])
            .filter(|id| !id.is_empty())
            .map(|id| ProbeConfig {
                device_id: id.to_string(),
                period_secs: settings
                    .get_float(&["temperature_sensor", "ambient", "frequency"])
                    .unwrap_or(d.chamber_probe.period_secs),
            });

        let pid = PidConfig {
            kp: settings.get_float(&["pid", "kp"]).unwrap_or(d.pid.kp),
            ki: settings.get_float(&["pid", "ki"]).unwrap_or(d.pid.ki),
            kd: settings.get_float(&["pid", "kd"]).unwrap_or(d.pid.kd),
            sample_secs: settings
                .get_float(&["pid", "sample_time"])
                .unwrap_or(d.pid.sample_secs),
            output_min: settings
                .get_float(&["pid", "output_min"])
                .unwrap_or(d.pid.output_min),
            output_max: settings
                .get_float(&["pid", "output_max"])
                .unwrap_or(d.pid.output_max),
        };

        Self {
            backend,
            control,
            heater,
            heater_fan: fan("heater_fan", &d.heater_fan),
            cooling_fan: fan("cooling_fan", &d.cooling_fan),
            iris,
            chamber_probe,
            ambient_probe,
            ambient_fallback_c: settings
                .get_float(&["temperature_sensor", "ambient", "fallback"])
                .unwrap_or(d.ambient_fallback_c),
            pid,
        }
    }
}
