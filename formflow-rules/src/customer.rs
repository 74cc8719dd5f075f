//! Customer configuration store
//!
//! Maps a customer id to the endpoints its submissions fan out to, plus the
//! per-endpoint adjustments (field renames, extra fields, enable conditions)
//! and default field values for that customer.

use std::{collections::BTreeMap, sync::Arc};

use formflow_common::{FieldValue, Payload, Submission};
use serde::{Deserialize, Serialize};

use crate::{endpoint::EndpointRegistry, error::ConfigError};

/// Decides whether an endpoint is enabled for a particular submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    Equals { field: String, value: FieldValue },
    Present { field: String },
    Absent { field: String },
}

impl Condition {
    #[must_use]
    pub fn matches(&self, submission: &Submission) -> bool {
        match self {
            Self::Equals { field, value } => submission
                .get(field)
                .is_some_and(|v| v.as_text().eq_ignore_ascii_case(&value.as_text())),
            Self::Present { field } => submission.has(field),
            Self::Absent { field } => !submission.has(field),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointOverride {
    /// Source field name to the name the endpoint receives.
    #[serde(default)]
    pub field_mapping: BTreeMap<String, String>,

    /// Merged after the endpoint's own additional fields, so these win.
    #[serde(default)]
    pub additional_fields: Payload,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_when: Option<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerConfig {
    /// Filled from the store key when loaded from configuration.
    #[serde(default)]
    pub id: String,

    /// Enabled endpoint names, in dispatch order.
    #[serde(default)]
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub overrides: BTreeMap<String, EndpointOverride>,

    /// Values used when a submission leaves a field blank or out.
    #[serde(default)]
    pub defaults: BTreeMap<String, FieldValue>,
}

impl CustomerConfig {
    #[must_use]
    pub fn new<I, S>(id: &str, endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.to_string(),
            endpoints: endpoints.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_override(mut self, endpoint: &str, over: EndpointOverride) -> Self {
        self.overrides.insert(endpoint.to_string(), over);
        self
    }

    #[must_use]
    pub fn with_default(mut self, field: &str, value: FieldValue) -> Self {
        self.defaults.insert(field.to_string(), value);
        self
    }

    #[must_use]
    pub fn override_for(&self, endpoint: &str) -> Option<&EndpointOverride> {
        self.overrides.get(endpoint)
    }

    /// The name `endpoint` receives `field` under.
    #[must_use]
    pub fn target_name<'a>(&'a self, endpoint: &str, field: &'a str) -> &'a str {
        self.override_for(endpoint)
            .and_then(|o| o.field_mapping.get(field))
            .map_or(field, String::as_str)
    }

    /// Endpoint names enabled for this submission, in configured order.
    pub fn enabled_endpoints<'a>(
        &'a self,
        submission: &'a Submission,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.endpoints
            .iter()
            .filter(move |endpoint| {
                self.override_for(endpoint)
                    .and_then(|o| o.enabled_when.as_ref())
                    .is_none_or(|condition| condition.matches(submission))
            })
            .map(String::as_str)
    }
}

/// Registry of customer configurations, keyed by customer id
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, CustomerConfig>")]
#[serde(into = "BTreeMap<String, CustomerConfig>")]
pub struct CustomerConfigStore {
    customers: BTreeMap<String, Arc<CustomerConfig>>,
}

impl CustomerConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: CustomerConfig) {
        self.customers.insert(config.id.clone(), Arc::new(config));
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::CustomerNotFound`] if the id is not registered.
    pub fn lookup(&self, customer_id: &str) -> Result<Arc<CustomerConfig>, ConfigError> {
        self.customers
            .get(customer_id)
            .cloned()
            .ok_or_else(|| ConfigError::CustomerNotFound(customer_id.to_string()))
    }

    /// Every endpoint a customer enables or overrides must be registered.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownEndpoint`] for the first unknown name.
    pub fn validate(&self, endpoints: &EndpointRegistry) -> Result<(), ConfigError> {
        for customer in self.customers.values() {
            if let Some(endpoint) = customer
                .endpoints
                .iter()
                .chain(customer.overrides.keys())
                .find(|name| !endpoints.contains(name))
            {
                return Err(ConfigError::UnknownEndpoint {
                    customer: customer.id.clone(),
                    endpoint: endpoint.clone(),
                });
            }
        }

        Ok(())
    }

    /// Customers in id order.
    pub fn iter(&self) -> impl Iterator<Item = &CustomerConfig> {
        self.customers.values().map(AsRef::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}

impl From<BTreeMap<String, CustomerConfig>> for CustomerConfigStore {
    fn from(value: BTreeMap<String, CustomerConfig>) -> Self {
        let mut store = Self::new();
        for (id, mut config) in value {
            config.id = id;
            store.insert(config);
        }
        store
    }
}

impl From<CustomerConfigStore> for BTreeMap<String, CustomerConfig> {
    fn from(value: CustomerConfigStore) -> Self {
        value
            .customers
            .into_iter()
            .map(|(id, config)| (id, Arc::unwrap_or_clone(config)))
            .collect()
    }
}
