//! Delivery of transformed payloads over HTTP

use std::time::Duration;

use async_trait::async_trait;
use formflow_common::Payload;
use formflow_rules::{ConfigError, Target};
use reqwest::header::CONTENT_TYPE;

use crate::{
    error::{DispatchError, SystemError},
    secrets::Secret,
};

pub const WEBHOOK_SECRET_HEADER: &str = "X-Webhook-Secret";

/// Payload keys a webhook consumes instead of forwarding.
const WEBHOOK_URL_FIELD: &str = "webhookUrl";
const WEBHOOK_SECRET_FIELD: &str = "secret";

/// Bucket shared by every REST delivery.
const REST_RATE_LIMIT_KEY: &str = "rest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Joined onto the transport's base URL.
    Path(String),
    Url(String),
}

/// One POST of a JSON payload.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub destination: Destination,
    pub headers: Vec<(String, String)>,
    /// Sent as [`WEBHOOK_SECRET_HEADER`].
    pub secret: Option<Secret>,
    pub body: Payload,
}

impl DeliveryRequest {
    /// Build the request for `target`.
    ///
    /// Webhook payloads may carry `webhookUrl` (replacing the configured URL)
    /// and `secret`; both are removed from the body before it is sent.
    #[must_use]
    pub fn for_target(target: &Target, mut body: Payload) -> Self {
        let headers = vec![(CONTENT_TYPE.as_str().to_string(), "application/json".to_string())];

        match target {
            Target::Rest { path } => Self {
                destination: Destination::Path(path.clone()),
                headers,
                secret: None,
                body,
            },
            Target::Webhook { url } => {
                let url = take_text(&mut body, WEBHOOK_URL_FIELD).unwrap_or_else(|| url.clone());
                let secret = take_text(&mut body, WEBHOOK_SECRET_FIELD).map(Secret::from);

                Self {
                    destination: Destination::Url(url),
                    headers,
                    secret,
                    body,
                }
            }
        }
    }

    /// Deliveries with the same key share a rate-limit bucket.
    #[must_use]
    pub fn rate_limit_key(&self) -> String {
        match &self.destination {
            Destination::Path(_) => REST_RATE_LIMIT_KEY.to_string(),
            Destination::Url(url) => reqwest::Url::parse(url)
                .ok()
                .and_then(|url| url.host_str().map(str::to_string))
                .unwrap_or_else(|| url.clone()),
        }
    }
}

fn take_text(body: &mut Payload, key: &str) -> Option<String> {
    match body.remove(key)? {
        serde_json::Value::String(text) if !text.trim().is_empty() => Some(text),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: String,
}

impl DeliveryResponse {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Sends a [`DeliveryRequest`] somewhere.
///
/// Any response is returned as-is; the caller decides what a non-2xx means.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the request could not be sent or no response arrived.
    async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DispatchError>;
}

/// [`Transport`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse or the client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SystemError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Self::with_client(client, base_url)
    }

    /// # Errors
    ///
    /// Returns an error if the base URL does not parse.
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self, DispatchError> {
        reqwest::Url::parse(base_url).map_err(|e| ConfigError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn resolve(&self, destination: &Destination) -> Result<reqwest::Url, ConfigError> {
        let url = match destination {
            Destination::Path(path) if path.starts_with('/') => format!("{}{path}", self.base_url),
            Destination::Path(path) => format!("{}/{path}", self.base_url),
            Destination::Url(url) => url.clone(),
        };

        reqwest::Url::parse(&url).map_err(|e| ConfigError::InvalidUrl {
            url,
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DispatchError> {
        let url = self.resolve(&request.destination)?;
        let body = serde_json::to_vec(&request.body)
            .map_err(|e| SystemError::Internal(format!("Failed to encode payload: {e}")))?;

        let mut builder = self.client.post(url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(secret) = &request.secret {
            builder = builder.header(WEBHOOK_SECRET_HEADER, secret.expose());
        }

        let response = builder.body(body).send().await?;
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(status, "Failed to read response body: {e}");
                String::new()
            }
        };

        Ok(DeliveryResponse { status, body })
    }
}
