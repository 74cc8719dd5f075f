//! Credentials for collaborators (enrichment service, webhook targets)
//!
//! Secrets expire after a TTL so a rotated credential is picked up again from
//! its source, and they never appear in `Debug` output or logs.

use std::{fmt, sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;

/// A credential value whose `Debug` and `Display` output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Arc<str>);

impl Secret {
    #[must_use]
    pub fn new(value: &str) -> Self {
        Self(Arc::from(value))
    }

    /// The raw value, for building a request header and nothing else.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("****")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

#[derive(Debug)]
struct Entry {
    value: Secret,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct SecretStore {
    entries: DashMap<String, Entry>,
    default_ttl: Duration,
}

impl SecretStore {
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    pub fn insert(&self, key: &str, value: impl Into<Secret>) {
        self.insert_with_ttl(key, value, self.default_ttl);
    }

    pub fn insert_with_ttl(&self, key: &str, value: impl Into<Secret>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Returns the secret if present and not yet expired; expired entries are removed.
    pub fn get(&self, key: &str) -> Option<Secret> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key)
            && entry.expires_at > now
        {
            return Some(entry.value.clone());
        }

        if self
            .entries
            .remove_if(key, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            tracing::debug!(key, "Secret expired");
        }
        None
    }

    /// Load every environment variable starting with `prefix`.
    ///
    /// `FORMFLOW_SECRET_ENRICHMENT_TOKEN` with prefix `FORMFLOW_SECRET_` is
    /// stored as `enrichment_token`. Returns how many were loaded.
    pub fn load_env(&self, prefix: &str) -> usize {
        self.load_from(std::env::vars(), prefix)
    }

    fn load_from(&self, vars: impl Iterator<Item = (String, String)>, prefix: &str) -> usize {
        let mut loaded = 0;
        for (name, value) in vars {
            if let Some(key) = name.strip_prefix(prefix)
                && !key.is_empty()
            {
                self.insert(&key.to_ascii_lowercase(), value);
                loaded += 1;
            }
        }
        loaded
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
