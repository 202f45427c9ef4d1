//! Field schema and value validation.
//!
//! Raw values arrive as untyped JSON. [`validate`] checks them against the
//! template's fields and resolves each into a [`FieldValue`] matching the
//! field's declared type, so nothing past this point handles untyped input.
//! All failures are collected; validation never stops at the first one.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{FailureReason, FieldFailure, ValidationFailed};
use crate::placeholder::{FieldType, TemplateField};

/// A validated value, tagged with the type it was resolved as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Checkbox(bool),
    /// The signer assigned to the field's slot, if any.
    Signature(Option<String>),
}

impl FieldValue {
    /// Text substituted into the document. Signatures render as nothing;
    /// they are stamped as images.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Number(n) => n.to_string(),
            Self::Checkbox(true) => "Yes".to_owned(),
            Self::Checkbox(false) => "No".to_owned(),
            Self::Signature(_) => String::new(),
        }
    }
}

/// Validated values keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldValues(BTreeMap<String, FieldValue>);

impl FieldValues {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        self.0.insert(name.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The signer assigned to a signature field.
    pub fn assigned_signer(&self, field: &str) -> Option<&str> {
        match self.0.get(field) {
            Some(FieldValue::Signature(Some(signer))) => Some(signer.as_str()),
            _ => None,
        }
    }

    /// Back to plain JSON, e.g. for re-validation.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Map<String, Value> {
        self.0
            .iter()
            .map(|(name, value)| {
                let json = match value {
                    FieldValue::Text(t) => Value::String(t.clone()),
                    FieldValue::Number(n) => serde_json::Number::from_f64(*n)
                        .map_or(Value::Null, Value::Number),
                    FieldValue::Checkbox(b) => Value::Bool(*b),
                    FieldValue::Signature(s) => s.clone().map_or(Value::Null, Value::String),
                };
                (name.clone(), json)
            })
            .collect()
    }
}

/// Validate raw values against `fields`.
///
/// # Errors
///
/// Returns [`ValidationFailed`] listing every field that failed.
pub fn validate(
    fields: &[TemplateField],
    raw: &serde_json::Map<String, Value>,
) -> Result<FieldValues, ValidationFailed> {
    validate_with_exemptions(fields, raw, &[])
}

/// Like [`validate`], but fields named in `not_required` skip the required
/// check. Signer name fields are filled at signing time and use this.
///
/// # Errors
///
/// Returns [`ValidationFailed`] listing every field that failed.
pub fn validate_with_exemptions(
    fields: &[TemplateField],
    raw: &serde_json::Map<String, Value>,
    not_required: &[&str],
) -> Result<FieldValues, ValidationFailed> {
    let mut values = FieldValues::new();
    let mut failures = Vec::new();

    for field in fields {
        let required = field.required && !not_required.contains(&field.name.as_str());
        let input = raw.get(&field.name).filter(|v| !v.is_null());
        let outcome = match field.field_type {
            FieldType::Text => text_value(field, required, input),
            FieldType::Number => number_value(field, required, input),
            FieldType::Checkbox => checkbox_value(required, input),
            FieldType::Signature => Ok(signature_value(input)),
        };
        match outcome {
            Ok(Some(value)) => values.insert(field.name.clone(), value),
            Ok(None) => {}
            Err(reason) => failures.push(FieldFailure {
                field: field.name.clone(),
                reason,
            }),
        }
    }

    for key in raw.keys() {
        if !fields.iter().any(|f| &f.name == key) {
            debug!(field = %key, "ignoring value for unknown field");
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(ValidationFailed { failures })
    }
}

fn text_value(
    field: &TemplateField,
    required: bool,
    input: Option<&Value>,
) -> Result<Option<FieldValue>, FailureReason> {
    let text = match input {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::Bool(b)) => Some(b.to_string()),
        Some(_) => return Err(FailureReason::NotText),
    };

    let blank = text.as_deref().is_none_or(|t| t.trim().is_empty());
    if required && blank {
        return Err(FailureReason::Required);
    }
    if let (Some(options), Some(text)) = (&field.options, &text) {
        if !text.is_empty() && !options.contains(text) {
            return Err(FailureReason::NotAnOption {
                options: options.clone(),
            });
        }
    }
    Ok(text.map(FieldValue::Text))
}

fn number_value(
    field: &TemplateField,
    required: bool,
    input: Option<&Value>,
) -> Result<Option<FieldValue>, FailureReason> {
    let number = match input {
        None => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().parse::<f64>().map_err(|_| {
            FailureReason::NotNumeric { value: s.clone() }
        })?),
        Some(Value::Number(n)) => n.as_f64(),
        Some(other) => {
            return Err(FailureReason::NotNumeric {
                value: other.to_string(),
            });
        }
    };

    let Some(number) = number else {
        return if required {
            Err(FailureReason::Required)
        } else {
            Ok(None)
        };
    };
    if !number.is_finite() {
        return Err(FailureReason::NotNumeric {
            value: number.to_string(),
        });
    }
    if let Some(min) = field.min_value.filter(|min| number < *min) {
        return Err(FailureReason::BelowMinimum { min });
    }
    if let Some(max) = field.max_value.filter(|max| number > *max) {
        return Err(FailureReason::AboveMaximum { max });
    }
    Ok(Some(FieldValue::Number(number)))
}

fn checkbox_value(
    required: bool,
    input: Option<&Value>,
) -> Result<Option<FieldValue>, FailureReason> {
    let checked = match input {
        None => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => true,
            "false" | "no" | "off" | "0" | "" => false,
            _ => return Err(FailureReason::NotBoolean { value: s.clone() }),
        },
        Some(Value::Number(n)) if n.as_f64() == Some(1.0) => true,
        Some(Value::Number(n)) if n.as_f64() == Some(0.0) => false,
        Some(other) => {
            return Err(FailureReason::NotBoolean {
                value: other.to_string(),
            });
        }
    };

    if required && !checked {
        return Err(FailureReason::MustBeChecked);
    }
    Ok(Some(FieldValue::Checkbox(checked)))
}

fn signature_value(input: Option<&Value>) -> Option<FieldValue> {
    match input {
        Some(Value::String(s)) if !s.trim().is_empty() => {
            Some(FieldValue::Signature(Some(s.trim().to_owned())))
        }
        _ => None,
    }
}
