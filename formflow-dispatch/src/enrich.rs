//! Optional enrichment step between transformation and delivery

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use formflow_common::Payload;
use formflow_rules::EndpointConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    error::{DispatchError, SystemError, TemporaryError},
    secrets::SecretStore,
};

/// Adds data to a transformed payload, typically by asking another service.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// # Errors
    ///
    /// Enrichment failures should be temporary so the dispatch is retried.
    async fn enrich(
        &self,
        endpoint: &EndpointConfig,
        payload: Payload,
    ) -> Result<Payload, DispatchError>;
}

const fn default_timeout_ms() -> u64 {
    5000
}

fn default_credential_key() -> String {
    "enrichment_token".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    pub url: String,

    /// Name of the bearer credential in the [`SecretStore`].
    #[serde(default = "default_credential_key")]
    pub credential_key: String,

    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

/// Posts `{"endpoint": ..., "payload": ...}` to an enrichment service and
/// merges the fields of the JSON object it returns into the payload.
pub struct HttpEnricher {
    client: reqwest::Client,
    config: EnrichmentConfig,
    secrets: Arc<SecretStore>,
}

impl HttpEnricher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: EnrichmentConfig, secrets: Arc<SecretStore>) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SystemError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            config,
            secrets,
        })
    }
}

fn enrichment_error(reason: impl Into<String>) -> DispatchError {
    TemporaryError::Enrichment(reason.into()).into()
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(
        &self,
        endpoint: &EndpointConfig,
        mut payload: Payload,
    ) -> Result<Payload, DispatchError> {
        let token = self.secrets.get(&self.config.credential_key).ok_or_else(|| {
            enrichment_error(format!(
                "credential {} is not available",
                self.config.credential_key
            ))
        })?;

        let response = self
            .client
            .post(&self.config.url)
            .bearer_auth(token.expose())
            .json(&json!({ "endpoint": endpoint.name, "payload": payload }))
            .send()
            .await
            .map_err(|e| enrichment_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(enrichment_error(format!("service answered HTTP {status}")));
        }

        let extra: Payload = response
            .json()
            .await
            .map_err(|e| enrichment_error(format!("unreadable response: {e}")))?;

        tracing::debug!(
            endpoint = %endpoint.name,
            fields = extra.len(),
            "Payload enriched"
        );
        payload.extend(extra);
        Ok(payload)
    }
}
