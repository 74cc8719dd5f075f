use thiserror::Error;

/// Problems with the static configuration tables.
///
/// These are never retried: the tables do not change while the process runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("No configuration registered for customer {0}")]
    CustomerNotFound(String),

    #[error("No endpoint registered with name {0}")]
    EndpointNotFound(String),

    #[error("Customer {customer} enables unknown endpoint {endpoint}")]
    UnknownEndpoint { customer: String, endpoint: String },

    /// A validation or transform names a field the endpoint never receives.
    #[error("Endpoint {endpoint} configures {field}, which is not one of its required fields")]
    UnknownRuleField { endpoint: String, field: String },

    #[error("Invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}
