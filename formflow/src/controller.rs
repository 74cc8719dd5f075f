use std::{
    fmt,
    sync::{Arc, LazyLock},
    time::Duration,
};

use formflow_common::{DispatchId, Signal, Submission, internal};
use formflow_dispatch::{
    DispatchConfig, DispatchRecord, EnrichmentConfig, HttpEnricher, HttpTransport, Orchestrator,
    RetryDisposition, SecretStore, ShutdownReport,
};
use formflow_rules::{CustomerConfigStore, EndpointRegistry, FieldRules};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    sync::broadcast,
};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

fn default_secret_prefix() -> String {
    "FORMFLOW_SECRET_".to_string()
}

const fn default_secret_ttl_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// REST endpoint paths are joined onto this.
    pub base_url: String,
}

/// Where collaborator credentials come from.
#[derive(Debug, Clone, Deserialize)]
pub struct SecretsConfig {
    /// Environment variables with this prefix are loaded at startup.
    ///
    /// Default: `FORMFLOW_SECRET_`
    #[serde(default = "default_secret_prefix")]
    pub env_prefix: String,

    /// Default: 3600 seconds
    #[serde(default = "default_secret_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            env_prefix: default_secret_prefix(),
            ttl_secs: default_secret_ttl_secs(),
        }
    }
}

/// Everything in `formflow.config.ron`
#[derive(Debug, Deserialize)]
pub struct Formflow {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    pub transport: TransportConfig,
    #[serde(default)]
    pub enrichment: Option<EnrichmentConfig>,
    /// Replaces the standard field table when given.
    #[serde(default = "FieldRules::standard")]
    pub rules: FieldRules,
    #[serde(default, alias = "secret")]
    pub secrets: SecretsConfig,
    #[serde(default, alias = "endpoint")]
    pub endpoints: EndpointRegistry,
    #[serde(default, alias = "customer")]
    pub customers: CustomerConfigStore,
}

/// What `check` found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSummary {
    pub workers: usize,
    pub concurrency_limit: usize,
    pub endpoints: Vec<String>,
    /// Customer id with the endpoints it fans out to.
    pub customers: Vec<(String, Vec<String>)>,
    pub enrichment: bool,
}

impl fmt::Display for ConfigSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} workers, at most {} dispatches in flight",
            self.workers, self.concurrency_limit
        )?;
        writeln!(f, "Endpoints: {}", self.endpoints.join(", "))?;
        for (customer, endpoints) in &self.customers {
            writeln!(f, "  {customer} -> {}", endpoints.join(", "))?;
        }
        write!(
            f,
            "Enrichment: {}",
            if self.enrichment { "enabled" } else { "disabled" }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub id: DispatchId,
    #[serde(flatten)]
    pub record: DispatchRecord,
}

/// Result of a one-shot `submit` run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubmitReport {
    pub outcomes: Vec<Outcome>,
    /// Request id and reason for every submission refused before dispatch.
    pub rejected: Vec<(String, String)>,
}

impl SubmitReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.record.state == formflow_common::DispatchState::Succeeded)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.rejected.is_empty() && self.succeeded() == self.outcomes.len()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Forms {
    Many(Vec<Submission>),
    One(Submission),
}

/// Read one submission or an array of them from JSON.
///
/// # Errors
///
/// Returns an error if the text is neither.
pub fn parse_forms(text: &str) -> anyhow::Result<Vec<Submission>> {
    Ok(match serde_json::from_str(text)? {
        Forms::Many(forms) => forms,
        Forms::One(form) => vec![form],
    })
}

/// Wait for ctrl-c or SIGTERM, then broadcast [`Signal::Shutdown`].
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed or nobody is
/// listening for the broadcast.
#[tracing::instrument(level = "trace")]
pub async fn shutdown_on_signal() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate Signal received, shutting down");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

impl Formflow {
    /// # Errors
    ///
    /// Returns an error if `text` is not a valid configuration.
    pub fn from_ron(text: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(text)?)
    }

    /// Cross-check the configuration without dispatching anything.
    ///
    /// # Errors
    ///
    /// Returns an error if a customer names an unregistered endpoint, the
    /// transport URL is invalid or there are no worker slots.
    pub fn check(&self) -> anyhow::Result<ConfigSummary> {
        anyhow::ensure!(
            self.dispatch.concurrency_limit() > 0,
            "max_workers and max_concurrent must both be at least 1"
        );
        self.customers.validate(&self.endpoints)?;
        HttpTransport::new(&self.transport.base_url, self.dispatch.delivery_timeout())?;

        Ok(ConfigSummary {
            workers: self.dispatch.max_workers,
            concurrency_limit: self.dispatch.concurrency_limit(),
            endpoints: self.endpoints.names().map(str::to_string).collect(),
            customers: self
                .customers
                .iter()
                .map(|customer| (customer.id.clone(), customer.endpoints.clone()))
                .collect(),
            enrichment: self.enrichment.is_some(),
        })
    }

    /// Build the dispatcher this configuration describes.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration does not [`check`](Self::check).
    pub fn orchestrator(self) -> anyhow::Result<Arc<Orchestrator>> {
        let secrets = Arc::new(SecretStore::new(Duration::from_secs(self.secrets.ttl_secs)));
        let loaded = secrets.load_env(&self.secrets.env_prefix);
        internal!(level = DEBUG, "Loaded {loaded} secrets from the environment");

        let transport =
            HttpTransport::new(&self.transport.base_url, self.dispatch.delivery_timeout())?;

        let mut builder = Orchestrator::builder()
            .config(self.dispatch)
            .customers(self.customers)
            .endpoints(self.endpoints)
            .rules(self.rules)
            .transport(Arc::new(transport));

        if let Some(enrichment) = self.enrichment {
            builder = builder.enricher(Arc::new(HttpEnricher::new(enrichment, secrets)?));
        }

        Ok(builder.build()?)
    }

    /// Dispatch `forms`, wait until every dispatch has finished, and report.
    ///
    /// Submissions that cannot be routed are reported as rejected; the rest
    /// still go out.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher cannot be built.
    #[tracing::instrument(level = "trace", skip_all, fields(forms = forms.len()))]
    pub async fn submit(mut self, forms: Vec<Submission>, priority: u32) -> anyhow::Result<SubmitReport> {
        // Every outcome goes into the report, so none may be evicted first.
        self.dispatch.retained_records = usize::MAX;
        let orchestrator = self.orchestrator()?;
        let mut report = SubmitReport::default();
        let mut ids = Vec::new();

        for form in forms {
            let request_id = form.request_id().to_string();
            match orchestrator.submit(form, priority) {
                Ok(accepted) => ids.extend(accepted),
                Err(e) => {
                    tracing::error!(request_id = %request_id, "Submission rejected: {e}");
                    report.rejected.push((request_id, e.to_string()));
                }
            }
        }

        orchestrator.wait_idle().await;
        orchestrator
            .shutdown(RetryDisposition::Drop, Duration::ZERO)
            .await;

        report.outcomes = ids
            .into_iter()
            .filter_map(|id| orchestrator.take_record(&id).map(|record| Outcome { id, record }))
            .collect();

        Ok(report)
    }

    /// Dispatch newline-delimited JSON submissions from `input` until it
    /// closes or `shutdown` fires, then shut the dispatcher down.
    ///
    /// Malformed or unroutable lines are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the dispatcher cannot be built or `input` fails.
    #[tracing::instrument(level = "trace", skip_all, err)]
    pub async fn serve<R>(
        self,
        input: R,
        priority: u32,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<ShutdownReport>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let orchestrator = self.orchestrator()?;
        let (stop, stopped) = broadcast::channel(1);

        let server = {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move { orchestrator.serve(stopped).await })
        };

        let fed = tokio::select! {
            fed = Self::feed(&orchestrator, input, priority) => {
                internal!(level = INFO, "Input closed, waiting for outstanding dispatches");
                orchestrator.wait_idle().await;
                fed
            }
            sig = shutdown.recv() => {
                tracing::debug!("Received {sig:?}");
                Ok(0)
            }
        };

        if stop.send(Signal::Shutdown).is_err() {
            tracing::warn!("Dispatcher stopped before it was asked to");
        }
        let report = server.await?;

        internal!(
            level = INFO,
            "Accepted {} dispatches, shutdown {}",
            fed.as_ref().copied().unwrap_or_default(),
            if report.is_clean() { "clean" } else { "incomplete" }
        );

        fed?;
        Ok(report)
    }

    async fn feed<R>(
        orchestrator: &Arc<Orchestrator>,
        input: R,
        priority: u32,
    ) -> std::io::Result<usize>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut accepted = 0;

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let submitted = serde_json::from_str::<Submission>(line)
                .map_err(anyhow::Error::from)
                .and_then(|form| orchestrator.submit(form, priority).map_err(Into::into));

            match submitted {
                Ok(ids) => accepted += ids.len(),
                Err(e) => tracing::error!("Skipping submission: {e}"),
            }
        }

        Ok(accepted)
    }
}
