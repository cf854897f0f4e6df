//! Payment service data model.
//!
//! Field names follow the service's JSON, which mixes `PascalCase` and
//! `camelCase` between endpoints.

use super::amount::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub const DEFAULT_FRESHNESS: Duration = Duration::from_secs(3 * 60);

/// Invoice identifier as assigned by the backend.
///
/// Echoed back verbatim in the payment report, so a numeric id stays numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InvoiceId {
    Number(u64),
    Text(String),
}

impl fmt::Display for InvoiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

/// An entry of the token listing.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PendingToken {
    #[serde(rename = "ID")]
    pub id: InvoiceId,
    #[serde(rename = "PaymentToken", alias = "paymentToken")]
    pub payment_token: String,
    #[serde(rename = "CreatedAt", alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "isPaid", default)]
    pub is_paid: bool,
    #[serde(rename = "productPrice", default)]
    pub product_price: Option<Amount>,
}

impl PendingToken {
    /// Whether the token was created at most `window` before `now`.
    ///
    /// Tokens stamped slightly in the future (clock skew) count as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match (now - self.created_at).to_std() {
            Ok(age) => age <= window,
            Err(_) => true,
        }
    }
}

/// Invoice detail fetched by payment token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    #[serde(rename = "ID")]
    pub id: InvoiceId,
    #[serde(rename = "paymentToken", alias = "PaymentToken")]
    pub payment_token: String,
    #[serde(rename = "productPrice")]
    pub product_price: Amount,
    #[serde(rename = "isPaid", default)]
    pub is_paid: bool,
}

/// Body of the final payment submission.
///
/// `productPrice` carries the amount actually inserted, not the invoice price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReport {
    #[serde(rename = "ID")]
    pub id: InvoiceId,
    #[serde(rename = "paymentToken")]
    pub payment_token: String,
    #[serde(rename = "productPrice")]
    pub product_price: Amount,
}

/// How the backend answered a payment submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Accepted {
        message: String,
        payment_date: Option<String>,
    },
    InsufficientPayment(String),
    AlreadyCompleted(String),
    Rejected {
        status: u16,
        message: String,
    },
}

pub const INSUFFICIENT_PAYMENT_MARKER: &str = "Insufficient payment";
pub const ALREADY_COMPLETED_MARKER: &str = "Payment already completed";

impl PaymentOutcome {
    /// Classifies a rejection by the marker substrings the backend uses.
    pub fn from_rejection(status: u16, message: String) -> Self {
        if message.contains(INSUFFICIENT_PAYMENT_MARKER) {
            Self::InsufficientPayment(message)
        } else if message.contains(ALREADY_COMPLETED_MARKER) {
            Self::AlreadyCompleted(message)
        } else {
            Self::Rejected { status, message }
        }
    }
}

/// Unpaid tokens created within `window` of `now`, in listing order.
pub fn select_fresh_tokens(
    tokens: &[PendingToken],
    now: DateTime<Utc>,
    window: Duration,
) -> Vec<&PendingToken> {
    tokens
        .iter()
        .filter(|token| !token.is_paid && token.is_fresh(now, window))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn token(id: u64, age_secs: i64, is_paid: bool) -> PendingToken {
        PendingToken {
            id: InvoiceId::Number(id),
            payment_token: format!("tok-{id}"),
            created_at: Utc::now() - TimeDelta::seconds(age_secs),
            is_paid,
            product_price: None,
        }
    }

    #[test]
    fn test_token_listing_deserialization() {
        let json = r#"{"data": [
            {"ID": 7, "PaymentToken": "abc", "CreatedAt": "2025-01-31T10:15:00.123456Z", "isPaid": false, "productPrice": 5000},
            {"ID": "x8", "paymentToken": "def", "createdAt": "2025-01-31T10:16:00Z"}
        ]}"#;

        #[derive(Deserialize)]
        struct Listing {
            data: Vec<PendingToken>,
        }

        let listing: Listing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.data.len(), 2);
        assert_eq!(listing.data[0].id, InvoiceId::Number(7));
        assert_eq!(listing.data[0].product_price, Some(Amount::new(5_000)));
        assert_eq!(listing.data[1].id, InvoiceId::Text("x8".to_string()));
        assert_eq!(listing.data[1].payment_token, "def");
        assert!(!listing.data[1].is_paid);
    }

    #[test]
    fn test_invoice_detail_deserialization() {
        let json = r#"{"ID": 12, "paymentToken": "abc", "productPrice": "5000", "isPaid": true}"#;
        let invoice: Invoice = serde_json::from_str(json).unwrap();
        assert_eq!(invoice.product_price, Amount::new(5_000));
        assert!(invoice.is_paid);
    }

    #[test]
    fn test_report_serializes_backend_field_names() {
        let report = PaymentReport {
            id: InvoiceId::Number(12),
            payment_token: "abc".to_string(),
            product_price: Amount::new(2_000),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"ID": 12, "paymentToken": "abc", "productPrice": 2000})
        );
    }

    #[test]
    fn test_select_fresh_tokens_filters_age_and_paid() {
        let tokens = vec![
            token(1, 600, false),
            token(2, 30, true),
            token(3, 90, false),
            token(4, 170, false),
        ];
        let fresh = select_fresh_tokens(&tokens, Utc::now(), DEFAULT_FRESHNESS);
        let ids: Vec<_> = fresh.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![InvoiceId::Number(3), InvoiceId::Number(4)]);
    }

    #[test]
    fn test_future_tokens_count_as_fresh() {
        let now = Utc::now();
        let mut future = token(1, 0, false);
        future.created_at = now + TimeDelta::seconds(5);
        assert!(future.is_fresh(now, DEFAULT_FRESHNESS));
    }

    #[test]
    fn test_rejection_classification() {
        assert!(matches!(
            PaymentOutcome::from_rejection(400, "Insufficient payment: 2000 < 5000".into()),
            PaymentOutcome::InsufficientPayment(_)
        ));
        assert!(matches!(
            PaymentOutcome::from_rejection(400, "Payment already completed".into()),
            PaymentOutcome::AlreadyCompleted(_)
        ));
        assert_eq!(
            PaymentOutcome::from_rejection(400, "Invoice not found".into()),
            PaymentOutcome::Rejected {
                status: 400,
                message: "Invoice not found".into()
            }
        );
    }
}
