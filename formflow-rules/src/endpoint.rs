//! Endpoint registry
//!
//! Static descriptors of downstream destinations: where a payload goes, which
//! form fields it needs and how each field is shaped on the way out.

use std::{collections::BTreeMap, sync::Arc};

use formflow_common::Payload;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    field::FieldRule,
    transform::{DateFormat, Transform},
};

/// Where an endpoint's payload is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// A path joined onto the transport's base URL.
    Rest { path: String },
    /// An absolute webhook URL. The payload may override it with `webhookUrl`
    /// and supply `secret` for the `X-Webhook-Secret` header.
    Webhook { url: String },
}

/// Per-endpoint overrides of the global retry policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Filled from the registry key when loaded from configuration.
    #[serde(default)]
    pub name: String,

    pub target: Target,

    /// Fields sent to this endpoint, in payload order.
    #[serde(default)]
    pub required_fields: Vec<String>,

    /// Transforms that replace the field table's default for this endpoint.
    #[serde(default)]
    pub transforms: BTreeMap<String, Transform>,

    /// Checks applied in addition to the field table's rules.
    #[serde(default)]
    pub validations: BTreeMap<String, Vec<FieldRule>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_format: Option<DateFormat>,

    /// Static fields merged verbatim into every payload.
    #[serde(default)]
    pub additional_fields: Payload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryOverride>,
}

impl EndpointConfig {
    #[must_use]
    pub fn new(name: &str, target: Target) -> Self {
        Self {
            name: name.to_string(),
            target,
            required_fields: Vec::new(),
            transforms: BTreeMap::new(),
            validations: BTreeMap::new(),
            date_format: None,
            additional_fields: Payload::new(),
            retry: None,
        }
    }

    #[must_use]
    pub fn with_required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_transform(mut self, field: &str, transform: Transform) -> Self {
        self.transforms.insert(field.to_string(), transform);
        self
    }

    #[must_use]
    pub fn with_validation(mut self, field: &str, rule: FieldRule) -> Self {
        self.validations
            .entry(field.to_string())
            .or_default()
            .push(rule);
        self
    }

    #[must_use]
    pub const fn with_date_format(mut self, format: DateFormat) -> Self {
        self.date_format = Some(format);
        self
    }

    #[must_use]
    pub fn with_additional_field(mut self, key: &str, value: serde_json::Value) -> Self {
        self.additional_fields.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub const fn with_retry(mut self, retry: RetryOverride) -> Self {
        self.retry = Some(retry);
        self
    }

    #[must_use]
    pub fn date_format(&self) -> DateFormat {
        self.date_format.unwrap_or_default()
    }

    #[must_use]
    pub fn requires(&self, field: &str) -> bool {
        self.required_fields.iter().any(|f| f == field)
    }

    /// Every configured transform and validation must name a required field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownRuleField`] for the first offending field.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.transforms
            .keys()
            .chain(self.validations.keys())
            .find(|field| !self.requires(field))
            .map_or(Ok(()), |field| {
                Err(ConfigError::UnknownRuleField {
                    endpoint: self.name.clone(),
                    field: field.clone(),
                })
            })
    }
}

/// Registry of endpoint descriptors, keyed by name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, EndpointConfig>")]
#[serde(into = "BTreeMap<String, EndpointConfig>")]
pub struct EndpointRegistry {
    endpoints: BTreeMap<String, Arc<EndpointConfig>>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint, replacing any previous one with the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint's rules name fields it does not require.
    pub fn insert(&mut self, config: EndpointConfig) -> Result<(), ConfigError> {
        config.check()?;
        tracing::debug!(endpoint = %config.name, target = ?config.target, "Registered endpoint");
        self.endpoints
            .insert(config.name.clone(), Arc::new(config));
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::EndpointNotFound`] if no endpoint has this name.
    pub fn get(&self, name: &str) -> Result<Arc<EndpointConfig>, ConfigError> {
        self.endpoints
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::EndpointNotFound(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl TryFrom<BTreeMap<String, EndpointConfig>> for EndpointRegistry {
    type Error = ConfigError;

    fn try_from(value: BTreeMap<String, EndpointConfig>) -> Result<Self, Self::Error> {
        let mut registry = Self::new();
        for (name, mut config) in value {
            config.name = name;
            registry.insert(config)?;
        }
        Ok(registry)
    }
}

impl From<EndpointRegistry> for BTreeMap<String, EndpointConfig> {
    fn from(value: EndpointRegistry) -> Self {
        value
            .endpoints
            .into_iter()
            .map(|(name, config)| (name, Arc::unwrap_or_clone(config)))
            .collect()
    }
}
