//! Chamber climate control engine.
//!
//! [`ClimateEngine`] owns every probe, actuator, the PID controller, and
//! the periodic control task, and exposes the handful of operations the
//! host integration layer calls: target changes, print-state events,
//! command interception, temperature enrichment, and reset/shutdown.
//!
//! ```text
//!  PeriodicTask ──▶ ┌───────────────────────────┐ ──▶ Heater
//!                   │        ClimateEngine       │ ──▶ Fans
//!  TemperatureProbe ▶  mode logic · PID · reset  │ ──▶ VentIris
//!                   └───────────────────────────┘
//! ```
//!
//! Every tick runs sensor read → PID → actuator writes in that order under
//! one lock, so ticks never overlap and host calls serialize against them.
//! No fault inside a tick reaches the host: the tick wrapper logs, forces
//! the heater off, and lets the schedule continue.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::config::{Backend, ChamberConfig, ControlConfig, HeaterDrive};
use crate::control::pid::PidController;
use crate::drivers::fan::{DummyFan, PwmFan};
use crate::drivers::heater::{DummyHeater, PwmHeater, RelayHeater};
use crate::drivers::iris::{DummyIris, ServoIris};
use crate::drivers::{Fan, Heater, HeaterMode, IrisPreset, VentIris};
use crate::error::{Result, SensorError};
use crate::events::PrinterEvent;
use crate::scheduler::PeriodicTask;
use crate::sensors::ds18b20::Ds18b20Source;
use crate::sensors::{DummySource, TemperatureProbe, TemperatureSource};
use crate::settings::Settings;

/// Key under which the chamber reading is reported to the host.
pub const CHAMBER_READING_KEY: &str = "C";

/// Probe label -> (current, target) mapping enriched for the host.
pub type TemperatureMap = BTreeMap<String, (Option<f64>, f64)>;

/// Gcode mnemonics that set the chamber target temperature.
const TARGET_TEMPERATURE_GCODES: [&str; 2] = ["M141", "M191"];

// ───────────────────────────────────────────────────────────────
// Device construction
// ───────────────────────────────────────────────────────────────

/// Builds the closed set of device implementations from configuration.
///
/// The engine goes through this boundary for every probe and actuator it
/// owns, so tests can inject recording devices.
pub trait DeviceFactory: Send + Sync {
    fn build_heater(&self, cfg: &ChamberConfig) -> Result<Box<dyn Heater>>;
    fn build_heater_fan(&self, cfg: &ChamberConfig) -> Result<Box<dyn Fan>>;
    fn build_cooling_fan(&self, cfg: &ChamberConfig) -> Result<Box<dyn Fan>>;
    fn build_iris(&self, cfg: &ChamberConfig) -> Result<Box<dyn VentIris>>;
    fn build_chamber_source(&self, cfg: &ChamberConfig) -> Result<Box<dyn TemperatureSource>>;
    fn build_ambient_source(&self, cfg: &ChamberConfig)
    -> Result<Option<Box<dyn TemperatureSource>>>;
}

/// Factory selecting dummy or file-backed devices per the configuration.
pub struct DefaultDeviceFactory;

impl DeviceFactory for DefaultDeviceFactory {
    fn build_heater(&self, cfg: &ChamberConfig) -> Result<Box<dyn Heater>> {
        Ok(match (cfg.backend, &cfg.heater.drive) {
            (Backend::Dummy, HeaterDrive::Relay { .. }) => {
                Box::new(DummyHeater::new(HeaterMode::Relay))
            }
            (Backend::Dummy, HeaterDrive::Pwm { .. }) => {
                Box::new(DummyHeater::new(HeaterMode::Pwm))
            }
            (Backend::Device, HeaterDrive::Relay { device, active_low }) => {
                Box::new(RelayHeater::new(device.as_str(), *active_low)?)
            }
            (Backend::Device, HeaterDrive::Pwm { device }) => {
                Box::new(PwmHeater::new(device.as_str())?)
            }
        })
    }

    fn build_heater_fan(&self, cfg: &ChamberConfig) -> Result<Box<dyn Fan>> {
        let fan = &cfg.heater_fan;
        Ok(match cfg.backend {
            Backend::Dummy => Box::new(DummyFan::new(fan.idle_power)),
            Backend::Device => Box::new(PwmFan::new(
                fan.device.as_str(),
                fan.frequency_hz,
                fan.idle_power,
            )?),
        })
    }

    fn build_cooling_fan(&self, cfg: &ChamberConfig) -> Result<Box<dyn Fan>> {
        let fan = &cfg.cooling_fan;
        Ok(match cfg.backend {
            Backend::Dummy => Box::new(DummyFan::new(fan.idle_power)),
            Backend::Device => Box::new(PwmFan::new(
                fan.device.as_str(),
                fan.frequency_hz,
                fan.idle_power,
            )?),
        })
    }

    fn build_iris(&self, cfg: &ChamberConfig) -> Result<Box<dyn VentIris>> {
        Ok(match cfg.backend {
            Backend::Dummy => Box::new(DummyIris::new()),
            Backend::Device => Box::new(ServoIris::new(cfg.iris.device.as_str(), cfg.iris.idle)?),
        })
    }

    fn build_chamber_source(&self, cfg: &ChamberConfig) -> Result<Box<dyn TemperatureSource>> {
        Ok(match cfg.backend {
            Backend::Dummy => Box::new(DummySource::new(cfg.ambient_fallback_c)),
            Backend::Device => Box::new(Ds18b20Source::new(&cfg.chamber_probe.device_id)),
        })
    }

    fn build_ambient_source(
        &self,
        cfg: &ChamberConfig,
    ) -> Result<Option<Box<dyn TemperatureSource>>> {
        let Some(probe) = &cfg.ambient_probe else {
            return Ok(None);
        };
        Ok(Some(match cfg.backend {
            Backend::Dummy => Box::new(DummySource::new(cfg.ambient_fallback_c)),
            Backend::Device => Box::new(Ds18b20Source::new(&probe.device_id)),
        }))
    }
}

// ───────────────────────────────────────────────────────────────
// Decision logic
// ───────────────────────────────────────────────────────────────

/// Control regime for one tick, selected in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Off,
    Heating,
    ActiveCooling,
    Maintain,
}

/// Desired actuator states for one tick.
struct ActuatorPlan {
    mode: Mode,
    heater: HeaterCommand,
    /// `None` holds the current heater-fan power (cooldown deadband).
    heater_fan: Option<f64>,
    cooling_fan: f64,
    iris: IrisPreset,
}

enum HeaterCommand {
    ForceOff,
    Relay { on: bool },
    Power(f64),
}

/// Relay hysteresis: turn on below `target - hysteresis`, off at/above
/// `target`, hold the current state inside the band.
pub fn relay_demand(currently_on: bool, measured: f64, target: f64, hysteresis: f64) -> bool {
    if measured < target - hysteresis {
        true
    } else if measured >= target {
        false
    } else {
        currently_on
    }
}

/// Heater-fan power from a PID output: off for non-positive demand, at
/// least the idle floor otherwise.
pub fn heater_fan_power(output: f64, idle_floor: f64) -> f64 {
    if output <= 0.0 {
        0.0
    } else if output < idle_floor {
        idle_floor.clamp(0.0, 100.0)
    } else {
        output.clamp(0.0, 100.0)
    }
}

/// Cooling-fan power from a bipolar PID output: the magnitude of a negative
/// output, floored at the idle minimum once positive, zero otherwise.
pub fn cooling_fan_power(output: f64, idle_floor: f64) -> f64 {
    let demand = -output;
    if demand <= 0.0 {
        0.0
    } else {
        demand.max(idle_floor).clamp(0.0, 100.0)
    }
}

/// Element-cooldown rule for the heater fan while the heater is off: keep
/// the idle floor while the chamber sits well above ambient, stop once it
/// has cooled off, hold the current power in between.
pub fn cooldown_fan_power(
    chamber: f64,
    ambient: f64,
    control: &ControlConfig,
    idle_floor: f64,
) -> Option<f64> {
    if chamber > ambient + control.cooldown_high_margin_c {
        Some(idle_floor.clamp(0.0, 100.0))
    } else if chamber < ambient + control.cooldown_low_margin_c {
        Some(0.0)
    } else {
        None
    }
}

fn parse_s_value(line: &str) -> Option<f64> {
    let rest = &line[line.find('S')? + 1..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

// ───────────────────────────────────────────────────────────────
// Engine internals
// ───────────────────────────────────────────────────────────────

struct EngineInner {
    config: ChamberConfig,
    target: Option<f64>,
    printing: bool,
    heater: Box<dyn Heater>,
    heater_fan: Box<dyn Fan>,
    cooling_fan: Box<dyn Fan>,
    iris: Box<dyn VentIris>,
    iris_preset: Option<IrisPreset>,
    pid: PidController,
    chamber: TemperatureProbe,
    ambient: Option<TemperatureProbe>,
}

/// One generation of constructed devices, probes already sampling.
struct DeviceSet {
    heater: Box<dyn Heater>,
    heater_fan: Box<dyn Fan>,
    cooling_fan: Box<dyn Fan>,
    iris: Box<dyn VentIris>,
    chamber: TemperatureProbe,
    ambient: Option<TemperatureProbe>,
}

impl DeviceSet {
    fn build(factory: &dyn DeviceFactory, config: &ChamberConfig) -> Result<Self> {
        let heater = factory.build_heater(config)?;
        let heater_fan = factory.build_heater_fan(config)?;
        let cooling_fan = factory.build_cooling_fan(config)?;
        let iris = factory.build_iris(config)?;

        let mut chamber = TemperatureProbe::new(
            "chamber",
            Duration::from_secs_f64(config.chamber_probe.period_secs.max(0.05)),
            factory.build_chamber_source(config)?,
        );
        chamber.start();

        let ambient = match factory.build_ambient_source(config)? {
            Some(source) => {
                let period = config
                    .ambient_probe
                    .as_ref()
                    .map_or(config.chamber_probe.period_secs, |p| p.period_secs);
                let mut probe = TemperatureProbe::new(
                    "ambient",
                    Duration::from_secs_f64(period.max(0.05)),
                    source,
                );
                probe.start();
                Some(probe)
            }
            None => None,
        };

        Ok(Self {
            heater,
            heater_fan,
            cooling_fan,
            iris,
            chamber,
            ambient,
        })
    }
}

impl EngineInner {
    fn build(factory: &dyn DeviceFactory, config: ChamberConfig) -> Result<Self> {
        let devices = DeviceSet::build(factory, &config)?;
        let pid = PidController::from_config(&config.pid);
        Ok(Self {
            config,
            target: None,
            printing: false,
            heater: devices.heater,
            heater_fan: devices.heater_fan,
            cooling_fan: devices.cooling_fan,
            iris: devices.iris,
            iris_preset: None,
            pid,
            chamber: devices.chamber,
            ambient: devices.ambient,
        })
    }

    /// Tear down every owned device, then construct replacements from the
    /// new configuration. The PID controller is retuned in place so its
    /// time base survives the rebuild.
    fn rebuild(&mut self, factory: &dyn DeviceFactory, config: ChamberConfig) -> Result<()> {
        self.teardown();
        let devices = DeviceSet::build(factory, &config)?;

        self.heater = devices.heater;
        self.heater_fan = devices.heater_fan;
        self.cooling_fan = devices.cooling_fan;
        self.iris = devices.iris;
        self.chamber = devices.chamber;
        self.ambient = devices.ambient;
        self.iris_preset = None;
        self.pid.reconfigure(&config.pid);
        if let Some(target) = self.target {
            self.pid.set_setpoint(target);
        }
        self.config = config;
        Ok(())
    }

    /// Stop every probe and release every actuator.
    fn teardown(&mut self) {
        self.chamber.stop();
        if let Some(probe) = &self.ambient {
            probe.stop();
        }
        self.heater.destroy();
        self.heater_fan.destroy();
        self.cooling_fan.destroy();
        self.iris.destroy();
    }

    /// Normalize and install a requested target temperature.
    ///
    /// A requested zero (or null) means "off". If a print is in progress
    /// and a post-print hold temperature is configured, the hold
    /// temperature substitutes instead. A non-null target always
    /// synchronizes the PID setpoint and re-enables automatic mode.
    fn apply_target(&mut self, requested: Option<f64>) {
        let requested = requested.filter(|t| *t > 0.0);
        let target = match requested {
            Some(t) => Some(t),
            None if self.printing && self.config.control.post_print_target_c > 0.0 => {
                Some(self.config.control.post_print_target_c)
            }
            None => None,
        };
        match target {
            Some(t) => {
                self.pid.set_setpoint(t);
                self.pid.set_auto_mode(true);
                info!("target chamber temperature set to {t:.1}C");
            }
            None => {
                self.pid.set_auto_mode(false);
                info!("target chamber temperature cleared");
            }
        }
        self.target = target;
    }

    /// One control evaluation: sensors → mode → PID → actuators.
    fn tick(&mut self) -> Result<()> {
        let chamber = self
            .chamber
            .temperature()
            .ok_or(SensorError::NoReading)?;
        let ambient = self
            .ambient
            .as_ref()
            .and_then(TemperatureProbe::temperature)
            .unwrap_or(self.config.ambient_fallback_c);

        let plan = self.decide(chamber, ambient);
        self.apply(chamber, plan)
    }

    fn decide(&mut self, chamber: f64, ambient: f64) -> ActuatorPlan {
        let control = self.config.control.clone();
        let heater_floor = self.heater_fan.idle_power();
        let cooling_floor = self.cooling_fan.idle_power();

        match self.target {
            None => ActuatorPlan {
                mode: Mode::Off,
                heater: HeaterCommand::ForceOff,
                heater_fan: cooldown_fan_power(chamber, ambient, &control, heater_floor),
                cooling_fan: 0.0,
                iris: IrisPreset::Idle,
            },
            Some(target) if target > control.heating_min_target_c => {
                let output = self.pid.compute(chamber);
                let heater = match self.heater.mode() {
                    HeaterMode::Relay => HeaterCommand::Relay {
                        on: relay_demand(
                            self.heater.is_on(),
                            chamber,
                            target,
                            control.hysteresis_c,
                        ),
                    },
                    HeaterMode::Pwm => HeaterCommand::Power(output.clamp(0.0, 100.0)),
                };
                ActuatorPlan {
                    mode: Mode::Heating,
                    heater,
                    heater_fan: Some(heater_fan_power(output, heater_floor)),
                    cooling_fan: 0.0,
                    iris: IrisPreset::Closed,
                }
            }
            Some(target) if self.printing && target <= control.cooling_max_target_c => {
                // Cooling regulates the chamber-over-ambient differential.
                let output = self.pid.compute(chamber - ambient);
                ActuatorPlan {
                    mode: Mode::ActiveCooling,
                    heater: HeaterCommand::ForceOff,
                    heater_fan: cooldown_fan_power(chamber, ambient, &control, heater_floor),
                    cooling_fan: cooling_fan_power(output, cooling_floor),
                    iris: IrisPreset::Open,
                }
            }
            Some(_) => ActuatorPlan {
                mode: Mode::Maintain,
                heater: HeaterCommand::ForceOff,
                heater_fan: cooldown_fan_power(chamber, ambient, &control, heater_floor),
                cooling_fan: 0.0,
                iris: IrisPreset::Idle,
            },
        }
    }

    fn apply(&mut self, chamber: f64, plan: ActuatorPlan) -> Result<()> {
        let mut changed = false;

        match plan.heater {
            HeaterCommand::ForceOff => match self.heater.mode() {
                HeaterMode::Relay => {
                    if self.heater.is_on() {
                        self.heater.turn_off()?;
                        changed = true;
                    }
                }
                HeaterMode::Pwm => {
                    if self.heater.power() > 0.0 {
                        self.heater.set_power(0.0)?;
                        changed = true;
                    }
                }
            },
            HeaterCommand::Relay { on } => {
                if on != self.heater.is_on() {
                    if on {
                        self.heater.turn_on()?;
                    } else {
                        self.heater.turn_off()?;
                    }
                    changed = true;
                }
            }
            HeaterCommand::Power(power) => {
                if (power - self.heater.power()).abs() > 1e-6 {
                    self.heater.set_power(power)?;
                    changed = true;
                }
            }
        }

        if let Some(power) = plan.heater_fan {
            if (power - self.heater_fan.power()).abs() > 1e-6 {
                self.heater_fan.set_power(power)?;
                changed = true;
            }
        }

        if (plan.cooling_fan - self.cooling_fan.power()).abs() > 1e-6 {
            self.cooling_fan.set_power(plan.cooling_fan)?;
            changed = true;
        }

        // Only a preset change reaches the servo; repeating the same preset
        // would jitter the flap.
        if self.iris_preset != Some(plan.iris) {
            self.iris.set_open(plan.iris.position_in(&self.config.iris))?;
            self.iris_preset = Some(plan.iris);
            changed = true;
        }

        if changed {
            let heater_state = match self.heater.mode() {
                HeaterMode::Relay => {
                    if self.heater.is_on() { "on".to_string() } else { "off".to_string() }
                }
                HeaterMode::Pwm => format!("{:.0}%", self.heater.power()),
            };
            let target = self
                .target
                .map_or_else(|| "off".to_string(), |t| format!("{t:.1}C"));
            info!(
                "chamber {:?}: temp={chamber:.1}C target={target} heater={heater_state} \
                 heater_fan={:.0}% cooling_fan={:.0}% iris={:?}",
                plan.mode,
                self.heater_fan.power(),
                self.cooling_fan.power(),
                plan.iris,
            );
        }
        Ok(())
    }

    /// Drive the heater to its safe de-energized state, logging only.
    fn force_heater_off(&mut self) {
        let result = match self.heater.mode() {
            HeaterMode::Relay => self.heater.turn_off(),
            HeaterMode::Pwm => self.heater.set_power(0.0),
        };
        if let Err(err) = result {
            log::error!("failed to force heater off: {err}");
        }
    }
}

// ───────────────────────────────────────────────────────────────
// ClimateEngine
// ───────────────────────────────────────────────────────────────

/// The engine facade handed to the host integration layer.
///
/// All methods are callable from any thread; construction, `start`, and
/// `reset` must run within a tokio runtime because they spawn the
/// background sampling and control tasks.
pub struct ClimateEngine {
    settings: Mutex<Settings>,
    factory: Box<dyn DeviceFactory>,
    inner: Arc<Mutex<EngineInner>>,
    ticker: Mutex<Option<PeriodicTask>>,
    down: AtomicBool,
}

impl ClimateEngine {
    /// Build the engine with the stock device factory.
    pub fn new(settings: Settings) -> Result<Self> {
        Self::with_factory(settings, Box::new(DefaultDeviceFactory))
    }

    /// Build the engine with a custom device factory.
    pub fn with_factory(settings: Settings, factory: Box<dyn DeviceFactory>) -> Result<Self> {
        let config = ChamberConfig::from_settings(&settings);
        info!("chamber climate engine initializing ({:?} devices)", config.backend);
        let inner = EngineInner::build(factory.as_ref(), config)?;
        Ok(Self {
            settings: Mutex::new(settings),
            factory,
            inner: Arc::new(Mutex::new(inner)),
            ticker: Mutex::new(None),
            down: AtomicBool::new(false),
        })
    }

    /// Begin periodic control. No-op while the control task is alive.
    pub fn start(&self) {
        self.down.store(false, Ordering::SeqCst);
        let mut ticker = self.ticker.lock();
        if ticker.as_ref().is_some_and(PeriodicTask::is_alive) {
            return;
        }
        let period = {
            let inner = self.inner.lock();
            Duration::from_secs_f64(inner.config.control.period_secs.max(0.1))
        };
        let inner = Arc::clone(&self.inner);
        *ticker = Some(PeriodicTask::spawn("chamber-control", period, move || {
            let mut inner = inner.lock();
            if let Err(err) = inner.tick() {
                warn!("control tick failed: {err}; forcing heater off");
                inner.force_heater_off();
            }
        }));
    }

    /// Whether the periodic control task is alive.
    pub fn is_running(&self) -> bool {
        self.ticker.lock().as_ref().is_some_and(PeriodicTask::is_alive)
    }

    /// Tear down and rebuild every owned device from the current settings,
    /// then restart the control task. Safe to call any number of times.
    pub fn reset(&self) -> Result<()> {
        info!("rebuilding chamber devices from settings");
        if let Some(task) = self.ticker.lock().take() {
            task.cancel();
        }
        let config = ChamberConfig::from_settings(&self.settings.lock());
        self.inner.lock().rebuild(self.factory.as_ref(), config)?;
        self.start();
        Ok(())
    }

    /// Install a new settings tree and rebuild.
    pub fn reconfigure(&self, settings: Settings) -> Result<()> {
        *self.settings.lock() = settings;
        self.reset()
    }

    /// Release every resource. Only the first call acts.
    pub fn shutdown(&self) {
        if self.down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.ticker.lock().take() {
            task.cancel();
        }
        self.inner.lock().teardown();
        info!("chamber climate engine shut down");
    }

    /// Set (or clear, with `None` or zero) the target chamber temperature.
    pub fn set_target_temperature(&self, target: Option<f64>) {
        self.inner.lock().apply_target(target);
    }

    /// Current target, if any.
    pub fn target_temperature(&self) -> Option<f64> {
        self.inner.lock().target
    }

    /// Last sampled chamber temperature, without blocking.
    pub fn chamber_temperature(&self) -> Option<f64> {
        self.inner.lock().chamber.temperature()
    }

    /// Feed a print-state event from the host.
    pub fn on_print_state_event(&self, event: &PrinterEvent) {
        let mut inner = self.inner.lock();
        if event.starts_print() {
            info!("print active ({event:?})");
            inner.printing = true;
        } else if event.ends_print() {
            info!("print ended ({event:?})");
            let hold = inner.config.control.post_print_target_c;
            inner.printing = false;
            inner.apply_target(Some(hold));
        }
    }

    /// Intercept a queued printer command; `M141`/`M191` set the target
    /// from the value following the `S` marker.
    pub fn on_command(&self, gcode: &str, line: &str) {
        if !TARGET_TEMPERATURE_GCODES.contains(&gcode) {
            return;
        }
        match parse_s_value(line) {
            Some(value) => {
                debug!("intercepted {gcode}: '{line}'");
                self.set_target_temperature(Some(value));
            }
            None => warn!("{gcode} without a parsable S value: '{line}'"),
        }
    }

    /// Insert the chamber entry into the host's temperature report.
    ///
    /// Waits up to the configured read timeout for a chamber reading and
    /// reports `None` past it. Also the self-heal point: a dead control
    /// task is rebuilt transparently here.
    pub async fn enrich_temperatures(&self, readings: &mut TemperatureMap) {
        if !self.down.load(Ordering::SeqCst) && !self.is_running() {
            warn!("control loop task is not alive; rebuilding the engine");
            if let Err(err) = self.reset() {
                warn!("engine rebuild failed: {err}");
            }
        }

        let (mut reader, timeout, target) = {
            let inner = self.inner.lock();
            (
                inner.chamber.reader(),
                Duration::from_secs_f64(inner.config.control.read_timeout_secs.max(0.0)),
                // Zero reads as "off" downstream.
                inner.target.unwrap_or(0.0),
            )
        };
        let current = reader.read_with_timeout(timeout).await;
        if current.is_none() {
            warn!("chamber temperature unavailable within {timeout:?}");
        }
        readings.insert(CHAMBER_READING_KEY.to_string(), (current, target));
    }
}

impl Drop for ClimateEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
