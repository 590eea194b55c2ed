//! External MFA messaging.
//!
//! The engine hands the gateway a phone number plus either a code or a
//! callback link; the gateway owns the actual SMS transport.

use async_trait::async_trait;
use parking_lot::Mutex;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;
use url::Url;

use crate::config::MfaGatewayConfig;

/// Message contract understood by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    #[serde(rename = "phone")]
    pub phone_number: String,
    /// Bare code or callback link carrying `code=<token>`.
    pub uri: String,
    /// Subject's name when a supervisor approves on their behalf.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[async_trait]
pub trait SmsGateway: Send + Sync {
    async fn send(&self, message: &SmsMessage) -> Result<(), anyhow::Error>;
}

/// Gateway reached over HTTP: `POST <url>/v1/sms` with a bearer secret,
/// answered by `204 No Content`.
#[derive(Debug, Clone)]
pub struct HttpSmsGateway {
    client: reqwest::Client,
    endpoint: Url,
    secret: Secret<String>,
}

impl HttpSmsGateway {
    pub fn new(config: &MfaGatewayConfig) -> Result<Self, anyhow::Error> {
        let endpoint = Url::parse(&format!(
            "{}/v1/sms",
            config.url.as_str().trim_end_matches('/')
        ))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build MFA gateway client: {}", e))?;

        tracing::info!(endpoint = %endpoint, "MFA gateway configured");

        Ok(Self {
            client,
            endpoint,
            secret: config.secret.clone(),
        })
    }
}

#[async_trait]
impl SmsGateway for HttpSmsGateway {
    #[instrument(skip(self, message), fields(endpoint = %self.endpoint))]
    async fn send(&self, message: &SmsMessage) -> Result<(), anyhow::Error> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(self.secret.expose_secret())
            .json(message)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "MFA gateway request failed");
                anyhow::anyhow!("MFA gateway request failed: {}", e)
            })?;

        let status = response.status();
        if status != reqwest::StatusCode::NO_CONTENT {
            tracing::warn!(status = %status, "MFA gateway rejected message");
            return Err(anyhow::anyhow!("MFA gateway responded with {}", status));
        }

        Ok(())
    }
}

/// Records messages instead of sending them.
#[derive(Debug, Default)]
pub struct MockSmsGateway {
    sent: Mutex<Vec<SmsMessage>>,
    failing: AtomicBool,
}

impl MockSmsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following `send` fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SmsMessage> {
        self.sent.lock().clone()
    }

    /// Code carried by the last message, whether bare or inside a link.
    pub fn last_code(&self) -> Option<String> {
        let last = self.sent.lock().last()?.uri.clone();
        match Url::parse(&last) {
            Ok(link) => link
                .query_pairs()
                .find(|(k, _)| k == "code")
                .map(|(_, v)| v.into_owned()),
            Err(_) => Some(last),
        }
    }
}

#[async_trait]
impl SmsGateway for MockSmsGateway {
    async fn send(&self, message: &SmsMessage) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("mock gateway unavailable"));
        }
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_shape() {
        let message = SmsMessage {
            phone_number: "+15550100".to_string(),
            uri: "123456".to_string(),
            name: None,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json, serde_json::json!({ "phone": "+15550100", "uri": "123456" }));
    }

    #[tokio::test]
    async fn test_mock_extracts_code_from_link() {
        let gateway = MockSmsGateway::new();
        gateway
            .send(&SmsMessage {
                phone_number: "+15550100".to_string(),
                uri: "https://login.corp.example/approve?code=abc-123".to_string(),
                name: Some("alice".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(gateway.last_code().as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_failing_mock_records_nothing() {
        let gateway = MockSmsGateway::new();
        gateway.set_failing(true);
        let message = SmsMessage {
            phone_number: "+15550100".to_string(),
            uri: "123456".to_string(),
            name: None,
        };
        assert!(gateway.send(&message).await.is_err());
        assert!(gateway.sent().is_empty());
    }
}
