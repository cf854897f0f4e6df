//! GPIO through the Linux sysfs interface (`/sys/class/gpio`).
//!
//! Rising edges are detected by a polling thread per input pin, so the
//! driver needs neither interrupts nor a userspace daemon.

use crate::domain::ports::{EdgeCallback, HardwareLine, Level, Pin};
use crate::error::HardwareError;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct SysfsGpio {
    root: PathBuf,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl SysfsGpio {
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, HardwareError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(HardwareError::Unavailable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self {
            root,
            poll_interval,
            stop: Arc::new(AtomicBool::new(false)),
            watchers: Mutex::new(Vec::new()),
        })
    }

    fn pin_dir(&self, pin: Pin) -> PathBuf {
        self.root.join(format!("gpio{}", pin.0))
    }

    fn export(&self, pin: Pin) -> Result<PathBuf, HardwareError> {
        let dir = self.pin_dir(pin);
        if dir.is_dir() {
            return Ok(dir);
        }
        fs::write(self.root.join("export"), pin.0.to_string())?;
        if !dir.is_dir() {
            return Err(HardwareError::Unavailable(format!(
                "{} did not appear after export",
                dir.display()
            )));
        }
        debug!(%pin, "exported");
        Ok(dir)
    }

    fn set_direction(&self, pin: Pin, direction: &str) -> Result<(), HardwareError> {
        let dir = self.export(pin)?;
        fs::write(dir.join("direction"), direction)?;
        Ok(())
    }
}

fn read_level(path: &Path) -> std::io::Result<Level> {
    let raw = fs::read_to_string(path)?;
    Ok(if raw.trim() == "1" { Level::High } else { Level::Low })
}

impl HardwareLine for SysfsGpio {
    fn configure_input(&self, pin: Pin) -> Result<(), HardwareError> {
        self.set_direction(pin, "in")
    }

    fn configure_output(&self, pin: Pin) -> Result<(), HardwareError> {
        self.set_direction(pin, "out")
    }

    fn on_rising_edge(&self, pin: Pin, callback: EdgeCallback) -> Result<(), HardwareError> {
        let value = self.pin_dir(pin).join("value");
        let mut previous = read_level(&value).map_err(|_| HardwareError::InvalidPin(pin.0))?;
        let stop = self.stop.clone();
        let interval = self.poll_interval;

        let handle = thread::Builder::new()
            .name(format!("gpio{}-edges", pin.0))
            .spawn(move || {
                let mut reported = false;
                while !stop.load(Ordering::Relaxed) {
                    match read_level(&value) {
                        Ok(level) => {
                            if previous == Level::Low && level == Level::High {
                                callback(Instant::now());
                            }
                            previous = level;
                            reported = false;
                        }
                        Err(e) if !reported => {
                            warn!(%pin, error = %e, "failed to read pulse line");
                            reported = true;
                        }
                        Err(_) => {}
                    }
                    thread::sleep(interval);
                }
            })?;
        self.watchers.lock().push(handle);
        Ok(())
    }

    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError> {
        let raw = if level.is_high() { "1" } else { "0" };
        fs::write(self.pin_dir(pin).join("value"), raw).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => HardwareError::InvalidPin(pin.0),
            _ => HardwareError::Io(e),
        })
    }
}

impl Drop for SysfsGpio {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.watchers.lock().drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn fake_tree(pins: &[u8]) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("export"), "").unwrap();
        for pin in pins {
            let pin_dir = dir.path().join(format!("gpio{pin}"));
            fs::create_dir(&pin_dir).unwrap();
            fs::write(pin_dir.join("direction"), "in").unwrap();
            fs::write(pin_dir.join("value"), "0").unwrap();
        }
        dir
    }

    #[test]
    fn test_output_configuration_and_writes() {
        let tree = fake_tree(&[15]);
        let gpio = SysfsGpio::new(tree.path(), Duration::from_millis(1)).unwrap();

        gpio.configure_output(Pin(15)).unwrap();
        gpio.write(Pin(15), Level::High).unwrap();

        let pin_dir = tree.path().join("gpio15");
        assert_eq!(fs::read_to_string(pin_dir.join("direction")).unwrap(), "out");
        assert_eq!(fs::read_to_string(pin_dir.join("value")).unwrap(), "1");
    }

    #[test]
    fn test_missing_pin_is_exported_first() {
        let tree = fake_tree(&[]);
        let gpio = SysfsGpio::new(tree.path(), Duration::from_millis(1)).unwrap();

        let result = gpio.configure_input(Pin(5));
        assert!(matches!(result, Err(HardwareError::Unavailable(_))));
        assert_eq!(fs::read_to_string(tree.path().join("export")).unwrap(), "5");
    }

    #[test]
    fn test_missing_root_is_unavailable() {
        let result = SysfsGpio::new("/definitely/not/a/gpio/root", Duration::from_millis(1));
        assert!(matches!(result, Err(HardwareError::Unavailable(_))));
    }

    #[test]
    fn test_polling_reports_rising_edges() {
        let tree = fake_tree(&[14]);
        let gpio = SysfsGpio::new(tree.path(), Duration::from_millis(1)).unwrap();
        gpio.configure_input(Pin(14)).unwrap();

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        gpio.on_rising_edge(
            Pin(14),
            Box::new(move |_| {
                let _ = tx.lock().send(());
            }),
        )
        .unwrap();

        fs::write(tree.path().join("gpio14").join("value"), "1").unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
}
