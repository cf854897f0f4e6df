use super::invoice::{Invoice, PaymentOutcome, PaymentReport, PendingToken};
use crate::error::{ClientError, HardwareError};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;

/// A BCM GPIO line number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pin(pub u8);

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GPIO{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(&self) -> bool {
        *self == Self::High
    }
}

/// Invoked by the driver once per rising edge, from the driver's own thread.
///
/// Implementations must return quickly and never block on I/O.
pub type EdgeCallback = Box<dyn Fn(Instant) + Send + Sync + 'static>;

/// The two GPIO lines of the acceptor: pulse input and enable output.
///
/// Writes are short register/file operations and stay synchronous so the
/// edge callback can gate the acceptor without an executor.
pub trait HardwareLine: Send + Sync {
    fn configure_input(&self, pin: Pin) -> Result<(), HardwareError>;
    fn configure_output(&self, pin: Pin) -> Result<(), HardwareError>;
    fn on_rising_edge(&self, pin: Pin, callback: EdgeCallback) -> Result<(), HardwareError>;
    fn write(&self, pin: Pin, level: Level) -> Result<(), HardwareError>;
}

/// The remote payment service.
#[async_trait]
pub trait InvoiceClient: Send + Sync {
    /// Lists candidate invoices for this device.
    async fn pending_tokens(&self) -> Result<Vec<PendingToken>, ClientError>;
    async fn invoice(&self, payment_token: &str) -> Result<Invoice, ClientError>;
    async fn submit_payment(&self, report: &PaymentReport) -> Result<PaymentOutcome, ClientError>;
}

pub type HardwareLineRef = Arc<dyn HardwareLine>;
pub type InvoiceClientRef = Arc<dyn InvoiceClient>;
