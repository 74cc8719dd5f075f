//! Dispatch pipeline
//!
//! The stages one work item passes through on a worker slot:
//!
//! 1. **Validate**: every required field present and passing its checks
//! 2. **Transform**: build the endpoint payload from the submission
//! 3. **Enrich**: optionally extend the payload through an [`Enricher`]
//! 4. **Deliver**: rate limit per target, then POST through the [`Transport`]
//!
//! Validation and transformation are pure; the same submission always
//! produces the same payload bytes.

use std::{sync::Arc, time::Duration};

use formflow_common::{FieldValue, Payload, Submission, outgoing};
use formflow_rules::{CustomerConfig, EndpointConfig, FieldRules, TransformError};

use crate::{
    enrich::Enricher,
    error::{DispatchError, PermanentError, TemporaryError},
    rate_limiter::RateLimiter,
    transport::{DeliveryRequest, DeliveryResponse, Transport},
    types::WorkItem,
};

/// What became of one pass through the pipeline.
#[derive(Debug)]
pub enum PipelineOutcome {
    Delivered(DeliveryResponse),
    /// Worth another attempt after a backoff.
    Retry(DispatchError),
    /// Will never succeed; do not retry.
    Terminal(DispatchError),
}

impl PipelineOutcome {
    fn from_error(error: DispatchError) -> Self {
        if error.is_temporary() {
            Self::Retry(error)
        } else {
            Self::Terminal(error)
        }
    }

    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

pub struct Pipeline {
    rules: Arc<FieldRules>,
    transport: Arc<dyn Transport>,
    enricher: Option<Arc<dyn Enricher>>,
    rate_limiter: RateLimiter,
    delivery_timeout: Duration,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        rules: Arc<FieldRules>,
        transport: Arc<dyn Transport>,
        rate_limiter: RateLimiter,
        delivery_timeout: Duration,
    ) -> Self {
        Self {
            rules,
            transport,
            enricher: None,
            rate_limiter,
            delivery_timeout,
        }
    }

    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Check every field `endpoint` requires, after customer defaults are applied.
    ///
    /// # Errors
    ///
    /// Returns [`PermanentError::Validation`] listing every failed check.
    pub fn validate(
        &self,
        submission: &Submission,
        customer: &CustomerConfig,
        endpoint: &EndpointConfig,
    ) -> Result<(), PermanentError> {
        let submission = submission.with_defaults(&customer.defaults);
        let mut reasons = Vec::new();

        for field in &endpoint.required_fields {
            let Some(value) = submission.get(field).filter(|v| !v.is_blank()) else {
                reasons.push(format!("{field}: missing required field"));
                continue;
            };

            if let Err(reason) = self.rules.validate(field, value) {
                reasons.push(reason);
            }

            let endpoint_rules = endpoint.validations.get(field).into_iter().flatten();
            reasons.extend(
                endpoint_rules.filter_map(|rule| rule.check(field, value).err()),
            );
        }

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(PermanentError::Validation(reasons))
        }
    }

    /// Build the payload `endpoint` receives.
    ///
    /// Required fields are emitted in configured order under their mapped
    /// names, followed by the endpoint's additional fields and then the
    /// customer's, so customer values win on conflicts.
    ///
    /// # Errors
    ///
    /// Returns [`PermanentError::Transformation`] if a value cannot be converted.
    pub fn transform(
        &self,
        submission: &Submission,
        customer: &CustomerConfig,
        endpoint: &EndpointConfig,
    ) -> Result<Payload, PermanentError> {
        let submission = submission.with_defaults(&customer.defaults);
        let date_format = endpoint.date_format();
        let mut payload = Payload::new();

        for field in &endpoint.required_fields {
            let value = submission.get(field).unwrap_or(&FieldValue::Null);
            if matches!(value, FieldValue::Null) {
                return Err(TransformError {
                    field: field.clone(),
                    reason: "no value to transform".to_string(),
                }
                .into());
            }

            let converted = match endpoint.transforms.get(field) {
                Some(transform) => transform.apply(field, value, date_format)?,
                None => self.rules.transform(field, value, date_format)?,
            };

            payload.insert(
                customer.target_name(&endpoint.name, field).to_string(),
                converted,
            );
        }

        payload.extend(endpoint.additional_fields.clone());
        if let Some(over) = customer.override_for(&endpoint.name) {
            payload.extend(over.additional_fields.clone());
        }

        Ok(payload)
    }

    /// # Errors
    ///
    /// Returns whatever the configured [`Enricher`] fails with.
    pub async fn enrich(
        &self,
        endpoint: &EndpointConfig,
        payload: Payload,
    ) -> Result<Payload, DispatchError> {
        match &self.enricher {
            Some(enricher) => enricher.enrich(endpoint, payload).await,
            None => Ok(payload),
        }
    }

    /// Rate limit, then send within the delivery timeout.
    ///
    /// # Errors
    ///
    /// Non-2xx responses, transport failures and timeouts are all temporary.
    pub async fn deliver(
        &self,
        endpoint: &EndpointConfig,
        payload: Payload,
    ) -> Result<DeliveryResponse, DispatchError> {
        let request = DeliveryRequest::for_target(&endpoint.target, payload);
        let key = request.rate_limit_key();
        self.rate_limiter.acquire(&key).await;

        outgoing!(level = DEBUG, "Delivering to {} via {}", endpoint.name, key);

        let response = tokio::time::timeout(self.delivery_timeout, self.transport.send(request))
            .await
            .map_err(|_| TemporaryError::Timeout(self.delivery_timeout))??;

        if response.is_success() {
            Ok(response)
        } else {
            Err(TemporaryError::http_status(response.status, &response.body).into())
        }
    }

    /// Run every stage for `item`.
    #[tracing::instrument(
        level = "debug",
        skip_all,
        fields(dispatch_id = %item.id, endpoint = %item.endpoint.name, retry = item.retry_count)
    )]
    pub async fn run(&self, item: &WorkItem) -> PipelineOutcome {
        let (submission, customer, endpoint) = (&item.submission, &item.customer, &item.endpoint);

        if let Err(e) = self.validate(submission, customer, endpoint) {
            return PipelineOutcome::Terminal(e.into());
        }

        let payload = match self.transform(submission, customer, endpoint) {
            Ok(payload) => payload,
            Err(e) => return PipelineOutcome::Terminal(e.into()),
        };

        let payload = match self.enrich(endpoint, payload).await {
            Ok(payload) => payload,
            Err(e) => return PipelineOutcome::from_error(e),
        };

        match self.deliver(endpoint, payload).await {
            Ok(response) => PipelineOutcome::Delivered(response),
            Err(e) => PipelineOutcome::from_error(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use formflow_rules::{EndpointOverride, FieldRule, Target, Transform};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::rate_limiter::RateLimitConfig;

    #[derive(Default)]
    struct Recorder {
        status: u16,
        requests: Mutex<Vec<DeliveryRequest>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DispatchError> {
            self.requests.lock().push(request);
            Ok(DeliveryResponse {
                status: self.status,
                body: String::new(),
            })
        }
    }

    fn pipeline(transport: Arc<Recorder>) -> Pipeline {
        Pipeline::new(
            Arc::new(FieldRules::standard()),
            transport,
            RateLimiter::new(RateLimitConfig::default()),
            Duration::from_secs(5),
        )
    }

    fn credit_bureau() -> EndpointConfig {
        EndpointConfig::new(
            "creditBureau",
            Target::Rest {
                path: "/api/credit-check".to_string(),
            },
        )
        .with_required_fields(["customerID", "ssn", "dateOfBirth", "emailAddress"])
        .with_transform("customerID", Transform::Uppercase)
        .with_validation("customerID", FieldRule::MinLength(3))
        .with_additional_field("source", json!("web-form"))
    }

    fn customer() -> CustomerConfig {
        CustomerConfig::new("CUST1", ["creditBureau"]).with_override(
            "creditBureau",
            EndpointOverride {
                field_mapping: BTreeMap::from([("emailAddress".to_string(), "email".to_string())]),
                additional_fields: [("source".to_string(), json!("partner"))]
                    .into_iter()
                    .collect(),
                enabled_when: None,
            },
        )
    }

    fn submission(ssn: &str) -> Submission {
        Submission::new(
            "req-1",
            "CUST1",
            [
                ("customerID", FieldValue::from("cust1")),
                ("ssn", FieldValue::from(ssn)),
                ("dateOfBirth", FieldValue::from("1990-01-31")),
                ("emailAddress", FieldValue::from("A@B.COM")),
            ],
        )
    }

    #[test]
    fn test_validate_collects_every_failure() {
        let pipeline = pipeline(Arc::default());
        let submission = Submission::new(
            "req-1",
            "CUST1",
            [
                ("customerID", FieldValue::from("c1")),
                ("ssn", FieldValue::from("12345")),
                ("emailAddress", FieldValue::from("a@b.com")),
            ],
        );

        let PermanentError::Validation(reasons) = pipeline
            .validate(&submission, &customer(), &credit_bureau())
            .unwrap_err()
        else {
            panic!("expected a validation failure");
        };

        assert_eq!(reasons.len(), 3);
        assert!(reasons[0].starts_with("customerID"));
        assert!(reasons[1].starts_with("ssn"));
        assert_eq!(reasons[2], "dateOfBirth: missing required field");
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let pipeline = pipeline(Arc::default());
        let endpoint = EndpointConfig::new(
            "crm",
            Target::Rest {
                path: "/crm".to_string(),
            },
        )
        .with_required_fields(["state"]);
        let customer =
            CustomerConfig::new("CUST1", ["crm"]).with_default("state", FieldValue::from("tx"));
        let submission = Submission::new("req-1", "CUST1", [("state", FieldValue::from(" "))]);

        assert!(pipeline.validate(&submission, &customer, &endpoint).is_ok());
        let payload = pipeline.transform(&submission, &customer, &endpoint).unwrap();
        assert_eq!(payload.get("state"), Some(&json!("TX")));
    }

    #[test]
    fn test_transform_builds_mapped_payload() {
        let pipeline = pipeline(Arc::default());
        let payload = pipeline
            .transform(&submission("123-45-6789"), &customer(), &credit_bureau())
            .unwrap();

        assert_eq!(
            serde_json::Value::Object(payload),
            json!({
                "customerID": "CUST1",
                "ssn": "123456789",
                "dateOfBirth": "1990-01-31",
                "email": "a@b.com",
                "source": "partner",
            })
        );
    }

    #[test]
    fn test_transform_is_idempotent() {
        let pipeline = pipeline(Arc::default());
        let first = pipeline
            .transform(&submission("123-45-6789"), &customer(), &credit_bureau())
            .unwrap();
        let second = pipeline
            .transform(&submission("123-45-6789"), &customer(), &credit_bureau())
            .unwrap();

        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
    }

    #[test]
    fn test_transform_failure_names_field() {
        let pipeline = pipeline(Arc::default());
        let endpoint = EndpointConfig::new(
            "crm",
            Target::Rest {
                path: "/crm".to_string(),
            },
        )
        .with_required_fields(["dateOfBirth"]);
        let submission =
            Submission::new("req-1", "CUST1", [("dateOfBirth", FieldValue::from("soon"))]);

        let err = pipeline
            .transform(&submission, &CustomerConfig::new("CUST1", ["crm"]), &endpoint)
            .unwrap_err();
        assert!(matches!(err, PermanentError::Transformation(ref e) if e.field == "dateOfBirth"));
    }

    #[tokio::test]
    async fn test_run_delivers() {
        let transport = Arc::new(Recorder {
            status: 200,
            ..Recorder::default()
        });
        let pipeline = pipeline(Arc::clone(&transport));
        let item = WorkItem::new(
            submission("123-45-6789"),
            Arc::new(customer()),
            Arc::new(credit_bureau()),
            1,
        );

        assert!(pipeline.run(&item).await.is_delivered());
        let requests = transport.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].body.get("ssn"), Some(&json!("123456789")));
    }

    #[tokio::test]
    async fn test_run_classifies_failures() {
        let transport = Arc::new(Recorder {
            status: 503,
            ..Recorder::default()
        });
        let pipeline = pipeline(Arc::clone(&transport));

        let item = WorkItem::new(
            submission("123-45-6789"),
            Arc::new(customer()),
            Arc::new(credit_bureau()),
            1,
        );
        assert!(matches!(
            pipeline.run(&item).await,
            PipelineOutcome::Retry(DispatchError::Temporary(TemporaryError::HttpStatus {
                status: 503,
                ..
            }))
        ));

        let invalid = WorkItem::new(
            submission("nope"),
            Arc::new(customer()),
            Arc::new(credit_bureau()),
            1,
        );
        assert!(matches!(
            pipeline.run(&invalid).await,
            PipelineOutcome::Terminal(DispatchError::Permanent(PermanentError::Validation(_)))
        ));
        assert_eq!(transport.requests.lock().len(), 1);
    }
}
