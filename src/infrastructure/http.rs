//! REST client for the payment backend.

use crate::config::{ApiConfig, DeviceConfig, TokenSource};
use crate::domain::invoice::{Invoice, PaymentOutcome, PaymentReport, PendingToken};
use crate::domain::ports::InvoiceClient;
use crate::error::ClientError;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Every backend response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SubmitAccepted {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "payment_date", alias = "payment date", alias = "paymentDate")]
    payment_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitRejected {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct HttpInvoiceClient {
    http_client: reqwest::Client,
    base_url: String,
    device_id: String,
    token_source: TokenSource,
    discovery_timeout: Duration,
}

impl HttpInvoiceClient {
    pub fn new(api: &ApiConfig, device: &DeviceConfig) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .timeout(api.request_timeout())
            .connect_timeout(CONNECT_TIMEOUT.min(api.request_timeout()))
            .build()
            .map_err(|e| ClientError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http_client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            device_id: device.id.clone(),
            token_source: device.token_source,
            discovery_timeout: api.discovery_timeout(),
        })
    }

    fn tokens_url(&self) -> String {
        match self.token_source {
            TokenSource::Device => format!("{}/invoice/device/{}", self.base_url, self.device_id),
            TokenSource::All => format!("{}/invoice/", self.base_url),
        }
    }

    fn invoice_url(&self, payment_token: &str) -> String {
        format!("{}/invoice/{}", self.base_url, payment_token)
    }

    fn submit_url(&self) -> String {
        format!("{}/order/billacceptor", self.base_url)
    }
}

fn transport_error(e: reqwest::Error) -> ClientError {
    if e.is_timeout() {
        ClientError::Timeout(e.to_string())
    } else if e.is_connect() {
        ClientError::Unreachable(format!("connection failed: {e}"))
    } else if e.is_decode() {
        ClientError::InvalidResponse(e.to_string())
    } else {
        ClientError::Request(e.to_string())
    }
}

async fn read_envelope<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
    what: &str,
) -> Result<Option<T>, ClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Request(format!("{what}: HTTP status {status}")));
    }
    let body = response.text().await.map_err(transport_error)?;
    let envelope: Envelope<T> = serde_json::from_str(&body)
        .map_err(|e| ClientError::InvalidResponse(format!("{what}: {e}")))?;
    Ok(envelope.data)
}

#[async_trait]
impl InvoiceClient for HttpInvoiceClient {
    async fn pending_tokens(&self) -> Result<Vec<PendingToken>, ClientError> {
        let url = self.tokens_url();
        debug!(%url, "listing payment tokens");
        let response = self
            .http_client
            .get(&url)
            .timeout(self.discovery_timeout)
            .send()
            .await
            .map_err(transport_error)?;
        Ok(read_envelope(response, "token listing")
            .await?
            .unwrap_or_default())
    }

    async fn invoice(&self, payment_token: &str) -> Result<Invoice, ClientError> {
        let url = self.invoice_url(payment_token);
        debug!(%url, "fetching invoice");
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(transport_error)?;
        read_envelope(response, "invoice detail")
            .await?
            .ok_or_else(|| ClientError::InvalidResponse(format!("invoice {payment_token}: missing data")))
    }

    async fn submit_payment(&self, report: &PaymentReport) -> Result<PaymentOutcome, ClientError> {
        let url = self.submit_url();
        debug!(%url, transaction_id = %report.id, "posting payment report");
        let response = self
            .http_client
            .post(&url)
            .json(report)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        match status {
            StatusCode::OK => {
                let accepted: SubmitAccepted = serde_json::from_str(&body).map_err(|e| {
                    ClientError::InvalidResponse(format!("payment response: {e}"))
                })?;
                Ok(PaymentOutcome::Accepted {
                    message: accepted.message.unwrap_or_default(),
                    payment_date: accepted.payment_date,
                })
            }
            StatusCode::BAD_REQUEST => {
                let message = match serde_json::from_str::<SubmitRejected>(&body) {
                    Ok(rejected) => rejected
                        .error
                        .or(rejected.message)
                        .unwrap_or_else(|| "unknown error".to_string()),
                    Err(_) => body,
                };
                Ok(PaymentOutcome::from_rejection(status.as_u16(), message))
            }
            other => Ok(PaymentOutcome::Rejected {
                status: other.as_u16(),
                message: body,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(source: TokenSource) -> HttpInvoiceClient {
        let api = ApiConfig {
            base_url: "http://backend.local/".to_string(),
            ..ApiConfig::default()
        };
        let device = DeviceConfig {
            id: "bic07".to_string(),
            token_source: source,
        };
        HttpInvoiceClient::new(&api, &device).unwrap()
    }

    #[test]
    fn test_urls_follow_token_source() {
        let by_device = client(TokenSource::Device);
        assert_eq!(by_device.tokens_url(), "http://backend.local/invoice/device/bic07");
        assert_eq!(by_device.invoice_url("abc"), "http://backend.local/invoice/abc");
        assert_eq!(by_device.submit_url(), "http://backend.local/order/billacceptor");

        let all = client(TokenSource::All);
        assert_eq!(all.tokens_url(), "http://backend.local/invoice/");
    }

    #[test]
    fn test_accepted_body_reads_spaced_payment_date() {
        let body = r#"{"message":"ok","payment date":"2024-05-01 10:00:00"}"#;
        let accepted: SubmitAccepted = serde_json::from_str(body).unwrap();
        assert_eq!(accepted.payment_date.as_deref(), Some("2024-05-01 10:00:00"));
    }
}
