//! Recording mock devices for integration tests.
//!
//! Every actuator call lands in a shared [`MockState`] so tests can assert
//! on effective device state and on the build/destroy ordering across
//! engine resets.

use std::sync::Arc;

use parking_lot::Mutex;

use heated_chamber::config::ChamberConfig;
use heated_chamber::drivers::{Fan, Heater, HeaterMode, VentIris};
use heated_chamber::engine::DeviceFactory;
use heated_chamber::sensors::{DummyHandle, DummySource, TemperatureSource};
use heated_chamber::{ActuatorError, Result, SensorError};

/// Shared record of everything the engine did to its devices.
#[derive(Default)]
pub struct MockState {
    /// Ordered `"<device>.build"` / `"<device>.destroy"` log.
    pub events: Vec<String>,
    pub heater_on: bool,
    pub heater_power: f64,
    pub heater_fan_power: f64,
    pub cooling_fan_power: f64,
    /// Every position the engine wrote to the iris.
    pub iris_positions: Vec<f64>,
    /// Injection handle for the current chamber source.
    pub chamber_handle: Option<DummyHandle>,
    pub ambient_handle: Option<DummyHandle>,
}

pub type SharedState = Arc<Mutex<MockState>>;

// ── Devices ───────────────────────────────────────────────────

pub struct MockHeater {
    mode: HeaterMode,
    state: SharedState,
}

impl Heater for MockHeater {
    fn mode(&self) -> HeaterMode {
        self.mode
    }

    fn turn_on(&mut self) -> std::result::Result<(), ActuatorError> {
        assert_eq!(self.mode, HeaterMode::Relay);
        self.state.lock().heater_on = true;
        Ok(())
    }

    fn turn_off(&mut self) -> std::result::Result<(), ActuatorError> {
        assert_eq!(self.mode, HeaterMode::Relay);
        self.state.lock().heater_on = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        assert_eq!(self.mode, HeaterMode::Relay);
        self.state.lock().heater_on
    }

    fn set_power(&mut self, power: f64) -> std::result::Result<(), ActuatorError> {
        assert_eq!(self.mode, HeaterMode::Pwm);
        self.state.lock().heater_power = power.clamp(0.0, 100.0);
        Ok(())
    }

    fn power(&self) -> f64 {
        assert_eq!(self.mode, HeaterMode::Pwm);
        self.state.lock().heater_power
    }

    fn destroy(&mut self) {
        let mut state = self.state.lock();
        state.heater_on = false;
        state.heater_power = 0.0;
        state.events.push("heater.destroy".into());
    }
}

pub struct MockFan {
    label: &'static str,
    idle_power: f64,
    state: SharedState,
}

impl MockFan {
    fn write(&self, power: f64) {
        let mut state = self.state.lock();
        match self.label {
            "heater_fan" => state.heater_fan_power = power,
            _ => state.cooling_fan_power = power,
        }
    }

    fn read(&self) -> f64 {
        let state = self.state.lock();
        match self.label {
            "heater_fan" => state.heater_fan_power,
            _ => state.cooling_fan_power,
        }
    }
}

impl Fan for MockFan {
    fn set_power(&mut self, power: f64) -> std::result::Result<(), ActuatorError> {
        self.write(power.clamp(0.0, 100.0));
        Ok(())
    }

    fn power(&self) -> f64 {
        self.read()
    }

    fn idle_power(&self) -> f64 {
        self.idle_power
    }

    fn destroy(&mut self) {
        self.write(0.0);
        self.state.lock().events.push(format!("{}.destroy", self.label));
    }
}

pub struct MockIris {
    state: SharedState,
}

impl VentIris for MockIris {
    fn set_open(&mut self, position: f64) -> std::result::Result<(), ActuatorError> {
        self.state.lock().iris_positions.push(position);
        Ok(())
    }

    fn position(&self) -> Option<f64> {
        self.state.lock().iris_positions.last().copied()
    }

    fn destroy(&mut self) {
        self.state.lock().events.push("iris.destroy".into());
    }
}

/// Source that never produces a complete reading.
pub struct FailingSource;

impl TemperatureSource for FailingSource {
    fn sample(&mut self) -> std::result::Result<f64, SensorError> {
        Err(SensorError::Incomplete)
    }

    fn describe(&self) -> String {
        "failing".to_string()
    }
}

// ── Factory ───────────────────────────────────────────────────

/// Device factory handing out the recording mocks above.
pub struct MockFactory {
    pub state: SharedState,
    pub heater_mode: HeaterMode,
    pub initial_chamber: f64,
    pub chamber_fails: bool,
    pub with_ambient: bool,
    pub initial_ambient: f64,
}

impl MockFactory {
    pub fn relay(initial_chamber: f64) -> (Self, SharedState) {
        let state = SharedState::default();
        (
            Self {
                state: Arc::clone(&state),
                heater_mode: HeaterMode::Relay,
                initial_chamber,
                chamber_fails: false,
                with_ambient: false,
                initial_ambient: 21.0,
            },
            state,
        )
    }

    pub fn pwm(initial_chamber: f64) -> (Self, SharedState) {
        let (mut factory, state) = Self::relay(initial_chamber);
        factory.heater_mode = HeaterMode::Pwm;
        (factory, state)
    }

    fn log(&self, event: &str) {
        self.state.lock().events.push(event.to_string());
    }
}

impl DeviceFactory for MockFactory {
    fn build_heater(&self, _cfg: &ChamberConfig) -> Result<Box<dyn Heater>> {
        self.log("heater.build");
        Ok(Box::new(MockHeater {
            mode: self.heater_mode,
            state: Arc::clone(&self.state),
        }))
    }

    fn build_heater_fan(&self, cfg: &ChamberConfig) -> Result<Box<dyn Fan>> {
        self.log("heater_fan.build");
        Ok(Box::new(MockFan {
            label: "heater_fan",
            idle_power: cfg.heater_fan.idle_power,
            state: Arc::clone(&self.state),
        }))
    }

    fn build_cooling_fan(&self, cfg: &ChamberConfig) -> Result<Box<dyn Fan>> {
        self.log("cooling_fan.build");
        Ok(Box::new(MockFan {
            label: "cooling_fan",
            idle_power: cfg.cooling_fan.idle_power,
            state: Arc::clone(&self.state),
        }))
    }

    fn build_iris(&self, _cfg: &ChamberConfig) -> Result<Box<dyn VentIris>> {
        self.log("iris.build");
        Ok(Box::new(MockIris {
            state: Arc::clone(&self.state),
        }))
    }

    fn build_chamber_source(&self, _cfg: &ChamberConfig) -> Result<Box<dyn TemperatureSource>> {
        self.log("chamber.build");
        if self.chamber_fails {
            return Ok(Box::new(FailingSource));
        }
        let source = DummySource::new(self.initial_chamber);
        self.state.lock().chamber_handle = Some(source.handle());
        Ok(Box::new(source))
    }

    fn build_ambient_source(
        &self,
        _cfg: &ChamberConfig,
    ) -> Result<Option<Box<dyn TemperatureSource>>> {
        if !self.with_ambient {
            return Ok(None);
        }
        self.log("ambient.build");
        let source = DummySource::new(self.initial_ambient);
        self.state.lock().ambient_handle = Some(source.handle());
        Ok(Some(Box::new(source)))
    }
}
