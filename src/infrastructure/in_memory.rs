use crate::domain::invoice::{
    INSUFFICIENT_PAYMENT_MARKER, Invoice, PaymentOutcome, PaymentReport, PendingToken,
};
use crate::domain::ports::InvoiceClient;
use crate::error::ClientError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Backend {
    tokens: Vec<PendingToken>,
    invoices: HashMap<String, Invoice>,
    outcomes: VecDeque<Result<PaymentOutcome, ClientError>>,
    reports: Vec<PaymentReport>,
    token_failure: Option<ClientError>,
}

/// A payment backend kept entirely in memory.
///
/// Submissions are answered from the scripted outcome queue first. With an
/// empty queue the backend accepts a report that covers the invoice price
/// (marking the invoice paid) and rejects a short one as insufficient.
/// Cloning shares the same backend.
#[derive(Debug, Default, Clone)]
pub struct InMemoryInvoiceClient {
    backend: Arc<RwLock<Backend>>,
}

impl InMemoryInvoiceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lists `invoice` as a token created now.
    pub async fn publish(&self, invoice: Invoice) {
        self.publish_at(invoice, Utc::now()).await;
    }

    pub async fn publish_at(&self, invoice: Invoice, created_at: chrono::DateTime<Utc>) {
        let mut backend = self.backend.write().await;
        backend.tokens.push(PendingToken {
            id: invoice.id.clone(),
            payment_token: invoice.payment_token.clone(),
            created_at,
            is_paid: invoice.is_paid,
            product_price: Some(invoice.product_price),
        });
        backend.invoices.insert(invoice.payment_token.clone(), invoice);
    }

    /// Queues the answer to the next submission.
    pub async fn push_outcome(&self, outcome: Result<PaymentOutcome, ClientError>) {
        self.backend.write().await.outcomes.push_back(outcome);
    }

    /// Makes every token listing fail until cleared with `None`.
    pub async fn fail_listing(&self, error: Option<ClientError>) {
        self.backend.write().await.token_failure = error;
    }

    pub async fn reports(&self) -> Vec<PaymentReport> {
        self.backend.read().await.reports.clone()
    }

    pub async fn is_paid(&self, payment_token: &str) -> bool {
        self.backend
            .read()
            .await
            .invoices
            .get(payment_token)
            .is_some_and(|invoice| invoice.is_paid)
    }
}

#[async_trait]
impl InvoiceClient for InMemoryInvoiceClient {
    async fn pending_tokens(&self) -> Result<Vec<PendingToken>, ClientError> {
        let backend = self.backend.read().await;
        if let Some(error) = &backend.token_failure {
            return Err(error.clone());
        }
        Ok(backend
            .tokens
            .iter()
            .map(|token| PendingToken {
                is_paid: backend
                    .invoices
                    .get(&token.payment_token)
                    .is_some_and(|invoice| invoice.is_paid),
                ..token.clone()
            })
            .collect())
    }

    async fn invoice(&self, payment_token: &str) -> Result<Invoice, ClientError> {
        self.backend
            .read()
            .await
            .invoices
            .get(payment_token)
            .cloned()
            .ok_or_else(|| ClientError::InvalidResponse(format!("unknown payment token {payment_token}")))
    }

    async fn submit_payment(&self, report: &PaymentReport) -> Result<PaymentOutcome, ClientError> {
        let mut backend = self.backend.write().await;
        backend.reports.push(report.clone());

        if let Some(outcome) = backend.outcomes.pop_front() {
            return outcome;
        }

        let Some(invoice) = backend.invoices.get_mut(&report.payment_token) else {
            return Ok(PaymentOutcome::Rejected {
                status: 404,
                message: format!("unknown payment token {}", report.payment_token),
            });
        };
        if invoice.is_paid {
            return Ok(PaymentOutcome::AlreadyCompleted(
                "Payment already completed".to_string(),
            ));
        }
        if report.product_price < invoice.product_price {
            return Ok(PaymentOutcome::InsufficientPayment(format!(
                "{INSUFFICIENT_PAYMENT_MARKER}: expected {}, received {}",
                invoice.product_price, report.product_price
            )));
        }
        invoice.is_paid = true;
        Ok(PaymentOutcome::Accepted {
            message: "Payment successful".to_string(),
            payment_date: Some(Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        })
    }
}
