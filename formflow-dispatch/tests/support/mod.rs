//! Shared fixtures for dispatch integration tests
#![allow(dead_code)] // Test utility module - not all helpers used in every test

pub mod mock_server;

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use formflow_common::{FieldValue, Submission};
use formflow_dispatch::{
    DeliveryRequest, DeliveryResponse, DispatchConfig, DispatchError, Orchestrator, RetryPolicy,
    Transport,
};
use formflow_rules::{
    CustomerConfig, CustomerConfigStore, DateFormat, EndpointConfig, EndpointOverride,
    EndpointRegistry, Target,
};
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::Instant;

/// A request seen by [`MockTransport`] and when it arrived.
#[derive(Debug, Clone)]
pub struct Call {
    pub at: Instant,
    pub request: DeliveryRequest,
}

/// In-process transport that answers with scripted status codes.
pub struct MockTransport {
    script: Mutex<VecDeque<u16>>,
    otherwise: u16,
    latency: Duration,
    calls: Mutex<Vec<Call>>,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl MockTransport {
    /// Answers every request with `status`.
    pub fn always(status: u16) -> Self {
        Self::scripted([], status)
    }

    /// Answers with `script` in order, then `otherwise` forever.
    pub fn scripted(script: impl IntoIterator<Item = u16>, otherwise: u16) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            otherwise,
            latency: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Highest number of requests that were in progress at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .iter()
            .map(|call| serde_json::to_vec(&call.request.body).unwrap_or_default())
            .collect()
    }

    /// Gaps between consecutive requests.
    pub fn gaps(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .windows(2)
            .map(|pair| pair[1].at.duration_since(pair[0].at))
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: DeliveryRequest) -> Result<DeliveryResponse, DispatchError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        self.calls.lock().push(Call {
            at: Instant::now(),
            request,
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.current.fetch_sub(1, Ordering::SeqCst);
        let status = self.script.lock().pop_front().unwrap_or(self.otherwise);

        Ok(DeliveryResponse {
            status,
            body: if status < 300 { "ok" } else { "unavailable" }.to_string(),
        })
    }
}

pub fn credit_bureau() -> EndpointConfig {
    EndpointConfig::new(
        "creditBureau",
        Target::Rest {
            path: "/api/credit-check".to_string(),
        },
    )
    .with_required_fields(["customerID", "ssn", "dateOfBirth"])
    .with_date_format(DateFormat::UsSlash)
}

pub fn crm() -> EndpointConfig {
    EndpointConfig::new(
        "crm",
        Target::Webhook {
            url: "https://hooks.example.com/crm".to_string(),
        },
    )
    .with_required_fields(["emailAddress", "phoneNumber"])
    .with_additional_field("source", json!("web-form"))
}

/// Receives a `label` field only, for ordering checks.
pub fn audit() -> EndpointConfig {
    EndpointConfig::new(
        "audit",
        Target::Rest {
            path: "/audit".to_string(),
        },
    )
    .with_required_fields(["label"])
}

pub fn endpoints() -> EndpointRegistry {
    let mut registry = EndpointRegistry::new();
    for endpoint in [credit_bureau(), crm(), audit()] {
        registry
            .insert(endpoint)
            .unwrap_or_else(|e| panic!("fixture endpoint rejected: {e}"));
    }
    registry
}

pub fn customers() -> CustomerConfigStore {
    let mut store = CustomerConfigStore::new();
    store.insert(
        CustomerConfig::new("CUST1", ["creditBureau", "crm"]).with_override(
            "crm",
            EndpointOverride {
                field_mapping: BTreeMap::from([("emailAddress".to_string(), "email".to_string())]),
                additional_fields: [("secret".to_string(), json!("s3cret"))]
                    .into_iter()
                    .collect(),
                enabled_when: None,
            },
        ),
    );
    store
}

pub fn application(request_id: &str) -> Submission {
    Submission::new(
        request_id,
        "CUST1",
        [
            ("customerID", FieldValue::from("CUST1")),
            ("ssn", FieldValue::from("123-45-6789")),
            ("dateOfBirth", FieldValue::from("1990-01-31")),
            ("emailAddress", FieldValue::from("Jane@Example.com")),
            ("phoneNumber", FieldValue::from("(555) 123-4567")),
        ],
    )
}

pub fn labelled(label: &str) -> Submission {
    Submission::new(label, "CUST1", [("label", FieldValue::from(label))])
}

/// Exact delays, one-second base, no rate limiting in the way.
pub fn config(max_workers: usize, max_concurrent: usize, max_retries: u32) -> DispatchConfig {
    let mut config = DispatchConfig {
        max_workers,
        max_concurrent,
        retry: RetryPolicy {
            max_retries,
            base_retry_delay_ms: 1000,
            max_retry_delay_ms: 300_000,
            retry_jitter_factor: 0.0,
        },
        ..DispatchConfig::default()
    };
    config.rate_limit.requests_per_second = 0.0;
    config
}

pub fn orchestrator(transport: Arc<MockTransport>, config: DispatchConfig) -> Arc<Orchestrator> {
    Orchestrator::builder()
        .config(config)
        .customers(customers())
        .endpoints(endpoints())
        .transport(transport)
        .build()
        .unwrap_or_else(|e| panic!("failed to build orchestrator: {e}"))
}

/// Let spawned tasks run until `done` holds, advancing paused time as needed.
pub async fn settle(mut done: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
