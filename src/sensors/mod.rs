//! Temperature probes.
//!
//! A [`TemperatureProbe`] owns a background sampling task that is the only
//! writer of the probe's value; readers take the last published value
//! without ever touching the physical source. The handoff is a watch
//! channel: a publish atomically replaces the value and wakes every waiter,
//! so a reader can never observe a half-written reading.

pub mod ds18b20;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::SensorError;

/// Pause between re-reads of an incomplete sample within one tick.
const RETRY_PAUSE: Duration = Duration::from_millis(200);

/// Attempts per tick before the sample is abandoned.
const MAX_ATTEMPTS: u32 = 5;

/// Raw single-shot sampling capability behind a probe.
pub trait TemperatureSource: Send {
    /// Take one reading in degrees Celsius.
    fn sample(&mut self) -> Result<f64, SensorError>;

    /// Human-readable identity for log lines.
    fn describe(&self) -> String;
}

/// In-memory source with an injectable value (bring-up and tests).
pub struct DummySource {
    celsius: Arc<AtomicU64>,
}

/// Write side of a [`DummySource`].
#[derive(Clone)]
pub struct DummyHandle {
    celsius: Arc<AtomicU64>,
}

impl DummySource {
    pub fn new(initial: f64) -> Self {
        Self {
            celsius: Arc::new(AtomicU64::new(initial.to_bits())),
        }
    }

    /// Handle for injecting values after the source moved into a probe.
    pub fn handle(&self) -> DummyHandle {
        DummyHandle {
            celsius: Arc::clone(&self.celsius),
        }
    }
}

impl DummyHandle {
    pub fn set(&self, celsius: f64) {
        self.celsius.store(celsius.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.celsius.load(Ordering::Relaxed))
    }
}

impl TemperatureSource for DummySource {
    fn sample(&mut self) -> Result<f64, SensorError> {
        Ok(f64::from_bits(self.celsius.load(Ordering::Relaxed)))
    }

    fn describe(&self) -> String {
        "dummy".to_string()
    }
}

/// Outcome of one sampling tick.
enum Sampled {
    /// A complete reading to publish.
    Publish(f64),
    /// The device is gone; clear the published value.
    Clear,
    /// Tick budget exhausted on incomplete data; keep the last value.
    Keep,
}

/// Background-sampled, single-valued temperature reader.
pub struct TemperatureProbe {
    label: String,
    period: Duration,
    source: Option<Box<dyn TemperatureSource>>,
    value_rx: watch::Receiver<Option<f64>>,
    value_tx: Option<watch::Sender<Option<f64>>>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TemperatureProbe {
    /// Create a probe. Sampling starts on [`start`](Self::start).
    pub fn new(label: impl Into<String>, period: Duration, source: Box<dyn TemperatureSource>) -> Self {
        let (value_tx, value_rx) = watch::channel(None);
        let (shutdown, _) = watch::channel(false);
        Self {
            label: label.into(),
            period,
            source: Some(source),
            value_rx,
            value_tx: Some(value_tx),
            shutdown,
            handle: None,
        }
    }

    /// Begin periodic sampling on a background task.
    ///
    /// Must be called from within a tokio runtime. A second call while the
    /// task is alive is a no-op; a stopped probe is recreated, not
    /// restarted.
    pub fn start(&mut self) {
        if self.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!("probe '{}' is already sampling", self.label);
            return;
        }
        let (Some(mut source), Some(tx)) = (self.source.take(), self.value_tx.take()) else {
            warn!("probe '{}' was stopped; recreate it instead of restarting", self.label);
            return;
        };

        let label = self.label.clone();
        let period = self.period;
        let mut stop = self.shutdown.subscribe();
        debug!("probe '{}' sampling {} every {:?}", label, source.describe(), period);

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => match sample_with_retry(source.as_mut(), &label).await {
                        Sampled::Publish(v) => {
                            let _ = tx.send(Some(v));
                        }
                        Sampled::Clear => {
                            let _ = tx.send(None);
                        }
                        Sampled::Keep => {}
                    },
                }
            }
            debug!("probe '{label}' stopped");
        }));
    }

    /// Cancel the background sampling task. Safe to call repeatedly.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether the sampling task is alive.
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Last published value, without blocking.
    pub fn temperature(&self) -> Option<f64> {
        *self.value_rx.borrow()
    }

    /// A reader handle usable independently of the engine lock.
    pub fn reader(&self) -> ProbeReader {
        ProbeReader {
            rx: self.value_rx.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for TemperatureProbe {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Read side of a probe's fresh-value handoff.
pub struct ProbeReader {
    rx: watch::Receiver<Option<f64>>,
}

impl ProbeReader {
    /// Return the current value immediately if one exists; otherwise wait
    /// for the probe's next successful sample, bounded by `timeout`.
    ///
    /// Returns `None` on timeout or when the probe is gone; the caller is
    /// never blocked indefinitely.
    pub async fn read_with_timeout(&mut self, timeout: Duration) -> Option<f64> {
        if let Some(v) = *self.rx.borrow_and_update() {
            return Some(v);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.rx.changed()).await {
                Ok(Ok(())) => {
                    if let Some(v) = *self.rx.borrow_and_update() {
                        return Some(v);
                    }
                    // A cleared value woke us; keep waiting for a reading.
                }
                // Writer task gone, or the deadline passed.
                Ok(Err(_)) | Err(_) => return None,
            }
        }
    }
}

async fn sample_with_retry(source: &mut dyn TemperatureSource, label: &str) -> Sampled {
    for attempt in 1..=MAX_ATTEMPTS {
        match source.sample() {
            Ok(v) => return Sampled::Publish(v),
            Err(err @ SensorError::Unreadable { .. }) => {
                debug!("probe '{label}': {err}");
                return Sampled::Clear;
            }
            Err(err) => {
                debug!("probe '{label}': attempt {attempt}/{MAX_ATTEMPTS}: {err}");
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
            }
        }
    }
    Sampled::Keep
}
