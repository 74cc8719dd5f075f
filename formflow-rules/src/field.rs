//! Field rule tables
//!
//! An explicit mapping from field name to the checks and the default transform
//! for that field. Rules are only ever looked up by exact field name.

use std::{collections::BTreeMap, fmt};

use chrono::NaiveDate;
use formflow_common::FieldValue;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    transform::{DateFormat, Transform, TransformError},
};

/// A compiled regular expression that (de)serialises as its source text.
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] if `source` does not compile.
    pub fn new(source: &str) -> Result<Self, ConfigError> {
        Regex::new(source)
            .map(Self)
            .map_err(|e| ConfigError::InvalidPattern {
                pattern: source.to_string(),
                reason: e.to_string(),
            })
    }

    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        self.0.is_match(text)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Self::new(&source).map_err(serde::de::Error::custom)
    }
}

/// A single check applied to one field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldRule {
    Pattern(Pattern),
    Range { min: f64, max: f64 },
    OneOf(Vec<String>),
    MinLength(usize),
    /// A calendar date written as `YYYY-MM-DD`, or a timestamp.
    Date,
}

impl FieldRule {
    /// # Errors
    ///
    /// Returns a human-readable reason when `value` fails the check.
    pub fn check(&self, field: &str, value: &FieldValue) -> Result<(), String> {
        match self {
            Self::Pattern(pattern) => {
                if pattern.is_match(value.as_text().trim()) {
                    Ok(())
                } else {
                    Err(format!("{field}: invalid format"))
                }
            }
            Self::Range { min, max } => {
                let number = value
                    .as_number()
                    .or_else(|| value.as_text().trim().parse::<f64>().ok())
                    .ok_or_else(|| format!("{field}: expected a number"))?;

                if (*min..=*max).contains(&number) {
                    Ok(())
                } else {
                    Err(format!("{field}: {number} is outside {min}..={max}"))
                }
            }
            Self::OneOf(allowed) => {
                let text = value.as_text();
                if allowed.iter().any(|a| a.eq_ignore_ascii_case(text.trim())) {
                    Ok(())
                } else {
                    Err(format!("{field}: must be one of {}", allowed.join(", ")))
                }
            }
            Self::MinLength(len) => {
                if value.as_text().trim().chars().count() >= *len {
                    Ok(())
                } else {
                    Err(format!("{field}: must be at least {len} characters"))
                }
            }
            Self::Date => match value {
                FieldValue::Timestamp(_) => Ok(()),
                other => NaiveDate::parse_from_str(other.as_text().trim(), "%Y-%m-%d")
                    .map(|_| ())
                    .map_err(|_| format!("{field}: expected a date (YYYY-MM-DD)")),
            },
        }
    }
}

/// The shared field table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRules {
    #[serde(default)]
    validators: BTreeMap<String, Vec<FieldRule>>,
    #[serde(default)]
    transforms: BTreeMap<String, Transform>,
}

const US_STATES: [&str; 51] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "DC", "FL", "GA", "HI", "ID", "IL", "IN",
    "IA", "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH",
    "NJ", "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT",
    "VT", "VA", "WA", "WV", "WI", "WY",
];

impl FieldRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The rules for the standard application form.
    #[must_use]
    #[allow(clippy::expect_used, reason = "literal patterns, exercised by the tests below")]
    pub fn standard() -> Self {
        let pattern = |source: &str| {
            FieldRule::Pattern(Pattern::new(source).expect("built-in pattern must compile"))
        };

        Self::new()
            .with_rule(
                "emailAddress",
                pattern(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$"),
            )
            .with_rule("phoneNumber", pattern(r"^\+?1?[\s.-]?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}$"))
            .with_rule("zipCode", pattern(r"^\d{5}(-?\d{4})?$"))
            .with_rule("ssn", pattern(r"^\d{3}-\d{2}-\d{4}$"))
            .with_rule(
                "creditScore",
                FieldRule::Range {
                    min: 300.0,
                    max: 850.0,
                },
            )
            .with_rule(
                "state",
                FieldRule::OneOf(US_STATES.iter().map(ToString::to_string).collect()),
            )
            .with_rule("dateOfBirth", FieldRule::Date)
            .with_rule(
                "annualIncome",
                FieldRule::Range {
                    min: 0.0,
                    max: f64::MAX,
                },
            )
            .with_transform("emailAddress", Transform::Lowercase)
            .with_transform("phoneNumber", Transform::DigitsOnly)
            .with_transform("ssn", Transform::DigitsOnly)
            .with_transform("state", Transform::Uppercase)
            .with_transform("dateOfBirth", Transform::Date)
            .with_transform("creditScore", Transform::Number)
            .with_transform("annualIncome", Transform::Number)
    }

    #[must_use]
    pub fn with_rule(mut self, field: &str, rule: FieldRule) -> Self {
        self.validators
            .entry(field.to_string())
            .or_default()
            .push(rule);
        self
    }

    #[must_use]
    pub fn with_transform(mut self, field: &str, transform: Transform) -> Self {
        self.transforms.insert(field.to_string(), transform);
        self
    }

    #[must_use]
    pub fn rules_for(&self, field: &str) -> &[FieldRule] {
        self.validators.get(field).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn transform_for(&self, field: &str) -> Option<&Transform> {
        self.transforms.get(field)
    }

    /// Check `value` against every rule registered for `field`.
    ///
    /// Fields with no registered rules always pass.
    ///
    /// # Errors
    ///
    /// Returns the reason for the first failing rule.
    pub fn validate(&self, field: &str, value: &FieldValue) -> Result<(), String> {
        self.rules_for(field)
            .iter()
            .try_for_each(|rule| rule.check(field, value))
    }

    /// Apply the table's transform for `field` (identity when none is registered).
    ///
    /// # Errors
    ///
    /// Returns a [`TransformError`] if the value cannot be converted.
    pub fn transform(
        &self,
        field: &str,
        value: &FieldValue,
        date_format: DateFormat,
    ) -> Result<serde_json::Value, TransformError> {
        self.transform_for(field)
            .unwrap_or(&Transform::Identity)
            .apply(field, value, date_format)
    }
}
