//! Form submissions as they arrive from callers.

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// The JSON object delivered to an endpoint.
///
/// `serde_json::Map` keeps keys ordered, so serialising the same payload twice
/// always yields the same bytes.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A single form field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
}

impl FieldValue {
    /// Text used by validators and transforms.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::Timestamp(ts) => ts.to_rfc3339_opts(SecondsFormat::Secs, true),
            Self::Text(s) => s.clone(),
        }
    }

    #[must_use]
    pub const fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Null values and blank text count as missing.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => number_to_json(*n),
            Self::Timestamp(ts) => {
                serde_json::Value::String(ts.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for FieldValue {
    #[allow(clippy::cast_precision_loss, reason = "form numbers are well within f64 range")]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    reason = "only integral values inside the i64 range take the integer path"
)]
fn integral(n: f64) -> Option<i64> {
    (n.is_finite() && n.fract() == 0.0 && n.abs() < i64::MAX as f64).then_some(n as i64)
}

fn format_number(n: f64) -> String {
    integral(n).map_or_else(|| n.to_string(), |i| i.to_string())
}

fn number_to_json(n: f64) -> serde_json::Value {
    integral(n).map_or_else(
        || {
            serde_json::Number::from_f64(n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number)
        },
        |i| serde_json::Value::Number(i.into()),
    )
}

fn generate_request_id() -> Arc<str> {
    Arc::from(ulid::Ulid::new().to_string())
}

/// One immutable form instance.
///
/// Cloning is cheap; the field map is shared. Nothing in the dispatcher
/// mutates a submission, stages that need a different view build a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(default = "generate_request_id")]
    request_id: Arc<str>,
    customer_id: Arc<str>,
    #[serde(default)]
    fields: Arc<BTreeMap<String, FieldValue>>,
}

impl Submission {
    pub fn new<I, K>(request_id: &str, customer_id: &str, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, FieldValue)>,
        K: Into<String>,
    {
        Self {
            request_id: Arc::from(request_id),
            customer_id: Arc::from(customer_id),
            fields: Arc::new(fields.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    #[must_use]
    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// Whether the field is present and not blank.
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.get(field).is_some_and(|v| !v.is_blank())
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns a submission with blank or missing fields filled from `defaults`.
    ///
    /// `self` is left untouched; if nothing needs filling the returned value
    /// shares the original field map.
    #[must_use]
    pub fn with_defaults(&self, defaults: &BTreeMap<String, FieldValue>) -> Self {
        let missing = defaults
            .iter()
            .filter(|(name, _)| !self.has(name))
            .collect::<Vec<_>>();

        if missing.is_empty() {
            return self.clone();
        }

        let mut fields = (*self.fields).clone();
        for (name, value) in missing {
            fields.insert(name.clone(), value.clone());
        }

        Self {
            request_id: Arc::clone(&self.request_id),
            customer_id: Arc::clone(&self.customer_id),
            fields: Arc::new(fields),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_deserialize_form() {
        let json = r#"{
            "requestId": "req-1",
            "customerId": "CUST1",
            "fields": {
                "emailAddress": "a@b.com",
                "creditScore": 720,
                "hasCoApplicant": false,
                "submittedAt": "2024-05-01T12:00:00Z",
                "middleName": null
            }
        }"#;

        let submission: Submission = serde_json::from_str(json).unwrap();
        assert_eq!(submission.request_id(), "req-1");
        assert_eq!(submission.customer_id(), "CUST1");
        assert_eq!(
            submission.get("emailAddress"),
            Some(&FieldValue::Text("a@b.com".to_string()))
        );
        assert_eq!(
            submission.get("creditScore"),
            Some(&FieldValue::Number(720.0))
        );
        assert_eq!(
            submission.get("hasCoApplicant"),
            Some(&FieldValue::Bool(false))
        );
        assert!(matches!(
            submission.get("submittedAt"),
            Some(FieldValue::Timestamp(_))
        ));
        assert!(!submission.has("middleName"));
    }

    #[test]
    fn test_request_id_generated_when_missing() {
        let submission: Submission =
            serde_json::from_str(r#"{"customerId": "CUST1", "fields": {}}"#).unwrap();
        assert_eq!(submission.request_id().len(), 26);
        assert!(submission.is_empty());
    }

    #[test]
    fn test_with_defaults_leaves_original_untouched() {
        let original = Submission::new(
            "req-1",
            "CUST1",
            [("state", FieldValue::from("")), ("zipCode", "12345".into())],
        );
        let defaults = BTreeMap::from([
            ("state".to_string(), FieldValue::from("TX")),
            ("zipCode".to_string(), FieldValue::from("99999")),
            ("country".to_string(), FieldValue::from("US")),
        ]);

        let filled = original.with_defaults(&defaults);

        assert_eq!(original.get("state"), Some(&FieldValue::from("")));
        assert_eq!(original.get("country"), None);
        assert_eq!(filled.get("state"), Some(&FieldValue::from("TX")));
        assert_eq!(filled.get("zipCode"), Some(&FieldValue::from("12345")));
        assert_eq!(filled.get("country"), Some(&FieldValue::from("US")));
    }

    #[test]
    fn test_number_rendering() {
        assert_eq!(FieldValue::Number(720.0).as_text(), "720");
        assert_eq!(FieldValue::Number(1.5).as_text(), "1.5");
        assert_eq!(FieldValue::Number(720.0).to_json(), serde_json::json!(720));
        assert_eq!(FieldValue::Number(f64::NAN).to_json(), serde_json::Value::Null);
    }
}
