#![allow(dead_code)]

use bill_acceptor::application::controller::{ControllerSettings, TickOutcome, TransactionController};
use bill_acceptor::domain::amount::Amount;
use bill_acceptor::domain::invoice::{Invoice, InvoiceId};
use bill_acceptor::domain::ports::{Level, Pin};
use bill_acceptor::domain::transaction::Transaction;
use bill_acceptor::infrastructure::in_memory::InMemoryInvoiceClient;
use bill_acceptor::infrastructure::simulated::SimulatedLine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const PULSE: Pin = Pin(14);
pub const ENABLE: Pin = Pin(15);

/// Spacing between simulated pulses, comfortably beyond the 50ms debounce.
pub const PULSE_GAP: Duration = Duration::from_millis(100);

pub fn invoice(token: &str, price: u64) -> Invoice {
    Invoice {
        id: InvoiceId::Text(format!("id-{token}")),
        payment_token: token.to_string(),
        product_price: Amount::new(price),
        is_paid: false,
    }
}

pub struct Harness {
    pub controller: TransactionController,
    pub line: SimulatedLine,
    pub backend: InMemoryInvoiceClient,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(ControllerSettings::default())
    }

    pub fn with_settings(settings: ControllerSettings) -> Self {
        let line = SimulatedLine::new();
        let backend = InMemoryInvoiceClient::new();
        let controller =
            TransactionController::new(Arc::new(line.clone()), Arc::new(backend.clone()), settings);
        controller.attach().unwrap();
        Self {
            controller,
            line,
            backend,
        }
    }

    /// Publishes an invoice and runs one discovery pass, which must activate it.
    pub async fn start(&self, token: &str, price: u64) -> Transaction {
        self.backend.publish(invoice(token, price)).await;
        self.controller
            .discover()
            .await
            .unwrap()
            .expect("invoice should activate")
    }

    /// Inserts one note as `pulses` edges, advancing the clock between them.
    pub async fn insert(&self, pulses: u32) {
        for _ in 0..pulses {
            self.line.pulse(PULSE, Instant::now());
            tokio::time::advance(PULSE_GAP).await;
        }
    }

    pub async fn tick_after(&self, wait: Duration) -> TickOutcome {
        tokio::time::advance(wait).await;
        self.controller.tick().await
    }

    pub fn enable(&self) -> Option<Level> {
        self.line.level(ENABLE)
    }

    pub fn total(&self) -> Option<Amount> {
        self.controller
            .snapshot()
            .transaction
            .map(|tx| tx.total_inserted)
    }
}
