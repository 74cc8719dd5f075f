//! Field transforms
//!
//! Pure functions from a raw form value to the representation an endpoint
//! expects. The same input always produces the same output.

use chrono::{DateTime, NaiveDate};
use formflow_common::FieldValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot transform {field}: {reason}")]
pub struct TransformError {
    pub field: String,
    pub reason: String,
}

impl TransformError {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Output layout for [`Transform::Date`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateFormat {
    /// `1990-01-31`
    #[default]
    Iso,
    /// `01/31/1990`
    UsSlash,
    /// `19900131`
    Compact,
}

impl DateFormat {
    const fn pattern(self) -> &'static str {
        match self {
            Self::Iso => "%Y-%m-%d",
            Self::UsSlash => "%m/%d/%Y",
            Self::Compact => "%Y%m%d",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    #[default]
    Identity,
    Uppercase,
    Lowercase,
    Trim,
    DigitsOnly,
    /// Reformat a date using the endpoint's [`DateFormat`].
    Date,
    /// Booleans and yes/no style answers become `"Y"` / `"N"`.
    YesNo,
    Number,
    Text,
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%m/%d/%Y"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|ts| ts.date_naive())
        })
}

impl Transform {
    /// # Errors
    ///
    /// Returns a [`TransformError`] if `value` cannot be represented as requested.
    pub fn apply(
        self,
        field: &str,
        value: &FieldValue,
        date_format: DateFormat,
    ) -> Result<Value, TransformError> {
        match self {
            Self::Identity => Ok(value.to_json()),
            Self::Uppercase => Ok(Value::String(value.as_text().trim().to_uppercase())),
            Self::Lowercase => Ok(Value::String(value.as_text().trim().to_lowercase())),
            Self::Trim => Ok(Value::String(value.as_text().trim().to_string())),
            Self::Text => Ok(Value::String(value.as_text())),
            Self::DigitsOnly => Ok(Value::String(
                value
                    .as_text()
                    .chars()
                    .filter(char::is_ascii_digit)
                    .collect(),
            )),
            Self::Date => {
                let date = match value {
                    FieldValue::Timestamp(ts) => ts.date_naive(),
                    other => parse_date(other.as_text().trim())
                        .ok_or_else(|| TransformError::new(field, "not a recognised date"))?,
                };
                Ok(Value::String(
                    date.format(date_format.pattern()).to_string(),
                ))
            }
            Self::YesNo => {
                let yes = match value {
                    FieldValue::Bool(b) => *b,
                    other => match other.as_text().trim().to_ascii_lowercase().as_str() {
                        "true" | "yes" | "y" | "1" => true,
                        "false" | "no" | "n" | "0" => false,
                        _ => return Err(TransformError::new(field, "not a yes/no answer")),
                    },
                };
                Ok(Value::String(if yes { "Y" } else { "N" }.to_string()))
            }
            Self::Number => {
                let number = match value {
                    FieldValue::Number(n) => *n,
                    other => other
                        .as_text()
                        .trim()
                        .replace(['$', ','], "")
                        .parse::<f64>()
                        .map_err(|_| TransformError::new(field, "not a number"))?,
                };
                Ok(FieldValue::Number(number).to_json())
            }
        }
    }
}
