//! Webhook Notifier
//!
//! Formats matched transactions as explorer links and delivers them to a
//! Slack-compatible incoming webhook. One attempt per call, no retries.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ExplorerConfig, SinkConfig};
use crate::decoder::TransactionRecord;

/// Default request timeout for webhook delivery
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors that can occur during notification delivery
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Unable to serialize webhook payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unable to POST webhook payload: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Webhook responded with status {status}: {body}")]
    Status { status: u16, body: String },
}

impl NotifyError {
    /// Short failure class for log fields
    pub fn reason(&self) -> &'static str {
        match self {
            NotifyError::Serialization(_) => "serialization",
            NotifyError::Transport(_) => "transport",
            NotifyError::Status { .. } => "non-success-status",
        }
    }
}

/// Links and identifiers for one matched transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub tx_uri: String,
    pub hash: String,
    pub address_uri: String,
    pub address: String,
    pub bundle_uri: String,
    pub bundle: String,
}

impl NotificationPayload {
    /// Build explorer links for a transaction record
    pub fn from_record(record: &TransactionRecord, explorer: &ExplorerConfig) -> Self {
        Self {
            tx_uri: join_uri(&explorer.tx_base_uri, &record.hash),
            hash: record.hash.clone(),
            address_uri: join_uri(&explorer.address_base_uri, &record.address),
            address: record.address.clone(),
            bundle_uri: join_uri(&explorer.bundle_base_uri, &record.bundle),
            bundle: record.bundle.clone(),
        }
    }

    /// Render the message text in Slack link syntax
    pub fn text(&self) -> String {
        format!(
            "monitoring:\n- saw tx <{}|{}>\n- address <{}|{}>\n- bundle <{}|{}>\n",
            self.tx_uri, self.hash, self.address_uri, self.address, self.bundle_uri, self.bundle
        )
    }

    /// Wrap the text in the webhook envelope
    pub fn to_message(&self) -> WebhookMessage {
        WebhookMessage { text: self.text() }
    }
}

/// JSON envelope expected by the webhook
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookMessage {
    pub text: String,
}

impl WebhookMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Join a base URI and an identifier with exactly one `/`
pub fn join_uri(base: &str, id: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), id)
}

/// Delivery seam for matched transactions
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notify: Send + Sync {
    /// Deliver one notification for a matched record
    async fn notify(&self, record: &TransactionRecord) -> Result<(), NotifyError>;
}

/// HTTP webhook notifier
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_uri: String,
    explorer: ExplorerConfig,
}

impl WebhookNotifier {
    /// Create a notifier for the configured sink and explorer links
    pub fn new(sink: &SinkConfig, explorer: ExplorerConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(sink.timeout).build()?;

        if sink.webhook_uri.is_empty() {
            info!("Webhook URI not set - notifications disabled");
        }

        Ok(Self {
            client,
            webhook_uri: sink.webhook_uri.clone(),
            explorer,
        })
    }

    /// Check if a sink is configured
    pub fn is_enabled(&self) -> bool {
        !self.webhook_uri.is_empty()
    }

    pub fn webhook_uri(&self) -> &str {
        &self.webhook_uri
    }

    /// POST a pre-built payload to the webhook
    pub async fn deliver(&self, payload: &NotificationPayload) -> Result<(), NotifyError> {
        if !self.is_enabled() {
            debug!("Skipping notification for {}: no webhook configured", payload.hash);
            return Ok(());
        }

        let body = payload.to_message().to_json()?;
        let response = self
            .client
            .post(&self.webhook_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Notify for WebhookNotifier {
    async fn notify(&self, record: &TransactionRecord) -> Result<(), NotifyError> {
        let payload = NotificationPayload::from_record(record, &self.explorer);
        self.deliver(&payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explorer() -> ExplorerConfig {
        ExplorerConfig {
            tx_base_uri: "https://explorer.test/transaction".to_string(),
            bundle_base_uri: "https://explorer.test/bundle".to_string(),
            address_base_uri: "https://explorer.test/address".to_string(),
        }
    }

    fn record() -> TransactionRecord {
        TransactionRecord {
            hash: "HASH999".to_string(),
            address: "ADDRXYZ".to_string(),
            value: 0,
            bundle: "BUNDLEA".to_string(),
            tag: String::new(),
            timestamp: 0,
            current_index: 0,
            last_index: 0,
        }
    }

    // ==================== NotificationPayload tests ====================

    #[test]
    fn test_payload_builds_explorer_links() {
        let payload = NotificationPayload::from_record(&record(), &explorer());

        assert_eq!(payload.tx_uri, "https://explorer.test/transaction/HASH999");
        assert_eq!(payload.address_uri, "https://explorer.test/address/ADDRXYZ");
        assert_eq!(payload.bundle_uri, "https://explorer.test/bundle/BUNDLEA");
    }

    #[test]
    fn test_payload_text_template() {
        let payload = NotificationPayload::from_record(&record(), &explorer());

        assert_eq!(
            payload.text(),
            "monitoring:\n\
             - saw tx <https://explorer.test/transaction/HASH999|HASH999>\n\
             - address <https://explorer.test/address/ADDRXYZ|ADDRXYZ>\n\
             - bundle <https://explorer.test/bundle/BUNDLEA|BUNDLEA>\n"
        );
    }

    #[test]
    fn test_message_json_envelope() {
        let payload = NotificationPayload::from_record(&record(), &explorer());
        let json = payload.to_message().to_json().unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = parsed.as_object().unwrap();
        assert_eq!(object.len(), 1);
        assert!(object["text"].as_str().unwrap().starts_with("monitoring:\n"));
    }

    // ==================== join_uri tests ====================

    #[test]
    fn test_join_uri_plain() {
        assert_eq!(join_uri("https://a/tx", "H"), "https://a/tx/H");
    }

    #[test]
    fn test_join_uri_trailing_slash() {
        assert_eq!(join_uri("https://a/tx/", "H"), "https://a/tx/H");
    }

    // ==================== NotifyError tests ====================

    #[test]
    fn test_status_error_includes_body() {
        let err = NotifyError::Status {
            status: 404,
            body: "no_service".to_string(),
        };
        assert!(err.to_string().contains("404"));
        assert!(err.to_string().contains("no_service"));
        assert_eq!(err.reason(), "non-success-status");
    }

    // ==================== WebhookNotifier tests ====================

    #[test]
    fn test_notifier_disabled_without_uri() {
        let sink = SinkConfig {
            webhook_uri: String::new(),
            timeout: DEFAULT_NOTIFY_TIMEOUT,
        };
        let notifier = WebhookNotifier::new(&sink, explorer()).unwrap();
        assert!(!notifier.is_enabled());
    }

    #[tokio::test]
    async fn test_disabled_notifier_succeeds_without_request() {
        let sink = SinkConfig {
            webhook_uri: String::new(),
            timeout: DEFAULT_NOTIFY_TIMEOUT,
        };
        let notifier = WebhookNotifier::new(&sink, explorer()).unwrap();
        tokio_test::assert_ok!(notifier.notify(&record()).await);
    }

    #[tokio::test]
    async fn test_unreachable_sink_is_transport_error() {
        // Bind then release a port so nothing is listening on it
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let sink = SinkConfig {
            webhook_uri: format!("http://127.0.0.1:{}/hook", port),
            timeout: Duration::from_secs(2),
        };
        let notifier = WebhookNotifier::new(&sink, explorer()).unwrap();

        let err = notifier.notify(&record()).await.unwrap_err();
        assert_eq!(err.reason(), "transport");
    }
}
