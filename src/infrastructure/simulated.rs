//! GPIO lines simulated in memory, for tests and the `--simulate` mode.

use crate::domain::ports::{EdgeCallback, HardwareLine, Level, Pin};
use crate::error::HardwareError;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

#[derive(Default)]
struct Lines {
    inputs: BTreeSet<Pin>,
    outputs: BTreeSet<Pin>,
    levels: HashMap<Pin, Level>,
    writes: Vec<(Pin, Level)>,
    callbacks: HashMap<Pin, Arc<EdgeCallback>>,
}

#[derive(Clone, Default)]
pub struct SimulatedLine {
    lines: Arc<Mutex<Lines>>,
    unavailable: Option<String>,
}

impl SimulatedLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver that refuses every operation, as when the GPIO daemon is down.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            lines: Arc::default(),
            unavailable: Some(reason.into()),
        }
    }

    fn check(&self) -> Result<(), HardwareError> {
        match &self.unavailable {
            Some(reason) => Err(HardwareError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    /// Fires a rising edge on `pin` at `at`.
    ///
    /// The callback runs on the caller's thread, outside the line lock.
    pub fn pulse(&self, pin: Pin, at: Instant) {
        let callback = self.lines.lock().callbacks.get(&pin).cloned();
        if let Some(callback) = callback {
            callback(at);
        }
    }

    /// Fires `count` edges spaced `gap` apart, starting at `start`.
    pub fn pulse_train(&self, pin: Pin, start: Instant, count: u32, gap: std::time::Duration) {
        for i in 0..count {
            self.pulse(pin, start + gap * i);
        }
    }

    pub fn level(&self, pin: Pin) -> Option<Level> {
        self.lines.lock().levels.get(&pin).copied()
    }

    /// Every level written so far, oldest first.
    pub fn writes(&self) -> Vec<(Pin, Level)> {
        self.lines.lock().writes.clone()
    }

    pub fn is_output(&self, pin: Pin) -> bool {
        self.lines.lock().outputs.contains(&pin)
    }

    pub fn is_input(&self, pin: Pin) -> bool {
        self.lines.lock().inputs.contains(&pin)
    }
}

impl HardwareLine for SimulatedLine {
    fn configure_input(&self, pin: Pin) -> Result<(), HardwareError> {
        self.check()?;
        let mut lines = self.lines.lock();
        lines.outputs.remove(&pin);
        lines.inputs.insert(pin);
        Ok(())
    }

    fn configure_output(&self, pin: Pin) -> Result<(), HardwareError> {
        self.check()?;
        let mut lines = self.lines.lock();
        lines.inputs.remove(&pin);
        lines.outputs.insert(pin);
        Ok(())
    }

    fn on_rising_edge(&self, pin: Pin, callback: EdgeCallback) -> Result<(), HardwareError> {
        self.check()?;
        let mut lines = self.lines.lock();
        if !lines.inputs.contains(&pin) {
            return Err(HardwareError::InvalidPin(pin.0));
        }
        lines.callbacks.insert(pin, Arc::new(callback));
        Ok(())
    }

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError> {
        self.check()?;
        let mut lines = self.lines.lock();
        if !lines.outputs.contains(&pin) {
            return Err(HardwareError::InvalidPin(pin.0));
        }
        lines.levels.insert(pin, level);
        lines.writes.push((pin, level));
        Ok(())
    }
}
