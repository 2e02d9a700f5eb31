//! Webhook transport: one POST of the payload, classified into success or a typed error.

use super::payload::DispatchPayload;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// 2xx response from the webhook.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: Value,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    #[error("webhook request timed out")]
    Timeout,
    #[error("webhook returned {status}")]
    Status { status: u16, body: Value },
    #[error("webhook request failed: {0}")]
    Network(String),
}

/// Sends one dispatch attempt. Implementations must not retry.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn post(&self, url: &str, payload: &DispatchPayload)
        -> Result<WebhookResponse, TransportError>;
}

/// reqwest-backed transport with a per-attempt timeout and optional API key header.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    api_key: Option<(String, String)>,
    timeout: Duration,
}

impl HttpTransport {
    /// `api_key` is `(header name, key)`.
    pub fn new(timeout: Duration, api_key: Option<(String, String)>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            timeout,
        }
    }
}

/// JSON body if it parses, the raw text otherwise, null when empty.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        payload: &DispatchPayload,
    ) -> Result<WebhookResponse, TransportError> {
        let mut req = self.client.post(url).timeout(self.timeout).json(payload);
        if let Some((ref header, ref key)) = self.api_key {
            req = req.header(header.as_str(), key.as_str());
        }
        let res = req.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;
        let status = res.status();
        let text = res.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Network(e.to_string())
            }
        })?;
        let body = parse_body(&text);
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(WebhookResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body(r#"{"a":1}"#), serde_json::json!({"a": 1}));
        assert_eq!(parse_body("Workflow was started"), Value::String("Workflow was started".into()));
    }
}
