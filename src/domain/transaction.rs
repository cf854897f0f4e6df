use super::amount::Amount;
use super::invoice::{Invoice, InvoiceId, PaymentReport};
use serde::Serialize;
use std::fmt;

/// Lifecycle of the controller. Only `Active` accepts money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    #[default]
    Idle,
    Searching,
    Active,
    Settling,
    Reporting,
}

impl TransactionState {
    /// Whether a transaction exists, i.e. discovery must stay parked.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Active | Self::Settling | Self::Reporting)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Active => "active",
            Self::Settling => "settling",
            Self::Reporting => "reporting",
        };
        f.write_str(label)
    }
}

/// The invoice currently being paid at the acceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub id: InvoiceId,
    pub payment_token: String,
    /// Fixed once the transaction starts.
    pub product_price: Amount,
    pub total_inserted: Amount,
    pub insufficient_payment_retries: u32,
}

impl Transaction {
    pub fn from_invoice(invoice: Invoice) -> Self {
        Self {
            id: invoice.id,
            payment_token: invoice.payment_token,
            product_price: invoice.product_price,
            total_inserted: Amount::ZERO,
            insufficient_payment_retries: 0,
        }
    }

    pub fn deposit(&mut self, amount: Amount) {
        self.total_inserted += amount;
    }

    pub fn is_covered(&self) -> bool {
        self.total_inserted >= self.product_price
    }

    pub fn remaining_due(&self) -> Amount {
        self.product_price.saturating_sub(self.total_inserted)
    }

    pub fn overpaid(&self) -> Amount {
        self.total_inserted.saturating_sub(self.product_price)
    }

    pub fn report(&self) -> PaymentReport {
        PaymentReport {
            id: self.id.clone(),
            payment_token: self.payment_token.clone(),
            product_price: self.total_inserted,
        }
    }
}

/// Read-only view of the controller for observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSnapshot {
    pub state: TransactionState,
    pub transaction: Option<Transaction>,
    pub pending_pulse_count: u32,
}
