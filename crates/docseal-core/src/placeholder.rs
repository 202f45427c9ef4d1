//! Placeholder grammar.
//!
//! A placeholder is `{{name|type|label|validation}}`, with everything after
//! `name` optional. `validation` holds `|`-separated directives:
//!
//! - `required`
//! - `min:<number>` and `max:<number>` (number fields only)
//! - `options:<a>,<b>,...` (text fields only, split on `,` with no trimming)
//! - `autofilled`
//!
//! A bad `name` rejects the whole placeholder. Everything else degrades:
//! unknown types become `text`, unparseable bounds are dropped, unknown
//! directives are ignored.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PlaceholderError;

/// Matches one placeholder token in a logical paragraph string.
pub(crate) static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    // Literal pattern, compiling it cannot fail.
    #[allow(clippy::expect_used)]
    Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid")
});

/// Identity attributes a field can be filled from.
const IDENTITY_ATTRIBUTES: [&str; 4] = ["full_name", "email", "designation", "division"];

/// The declared type of a template field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Checkbox,
    Signature,
}

impl FieldType {
    /// The keyword used in placeholders.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Checkbox => "checkbox",
            Self::Signature => "signature",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_lowercase().as_str() {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "checkbox" => Some(Self::Checkbox),
            "signature" => Some(Self::Signature),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field declared by a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateField {
    /// Lowercase identifier, unique within a template version.
    pub name: String,
    /// Declared type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Human-readable label.
    pub label: String,
    /// The validation section exactly as written.
    pub validation_raw: String,
    /// Whether a value must be supplied (or, for checkboxes, checked).
    pub required: bool,
    /// Allowed values for an enumerated text field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    /// Inclusive lower bound for number fields.
    #[serde(default)]
    pub min_value: Option<f64>,
    /// Inclusive upper bound for number fields.
    #[serde(default)]
    pub max_value: Option<f64>,
    /// Filled from the signer's identity rather than typed by the user.
    pub is_autofilled: bool,
    /// How many times the placeholder appears in the template.
    #[serde(default = "one")]
    pub occurrences: usize,
}

fn one() -> usize {
    1
}

impl TemplateField {
    /// Parse a full `{{...}}` token.
    ///
    /// # Errors
    ///
    /// Returns [`PlaceholderError::Malformed`] if the token is not wrapped in
    /// `{{ }}` or its name is not `[a-z0-9_]+`.
    pub fn parse(token: &str) -> Result<Self, PlaceholderError> {
        let inner = token
            .strip_prefix("{{")
            .and_then(|t| t.strip_suffix("}}"))
            .ok_or_else(|| PlaceholderError::Malformed {
                token: token.to_owned(),
                reason: "placeholder must be wrapped in '{{' and '}}'".to_owned(),
            })?;
        Self::parse_inner(token, inner)
    }

    /// Parse the content between the braces. `token` is only used for
    /// error messages.
    pub(crate) fn parse_inner(token: &str, inner: &str) -> Result<Self, PlaceholderError> {
        let mut parts = inner.split('|');
        let name = parts.next().unwrap_or_default().trim();
        validate_name(name).map_err(|reason| PlaceholderError::Malformed {
            token: token.to_owned(),
            reason,
        })?;

        let field_type = match parts.next().map(str::trim) {
            None | Some("") => FieldType::Text,
            Some(keyword) => FieldType::from_keyword(keyword).unwrap_or_else(|| {
                warn!(field = name, keyword, "unknown field type, treating as text");
                FieldType::Text
            }),
        };

        let label = match parts.next().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_owned(),
            _ => label_from_name(name),
        };

        let validation_raw = parts.collect::<Vec<_>>().join("|");
        let directives = Directives::parse(name, field_type, &validation_raw);

        Ok(Self {
            name: name.to_owned(),
            field_type,
            label,
            is_autofilled: directives.autofilled || is_identity_attribute(name),
            required: directives.required,
            options: directives.options,
            min_value: directives.min,
            max_value: directives.max,
            validation_raw,
            occurrences: 1,
        })
    }

    /// Rebuild the canonical placeholder token for this field.
    #[must_use]
    pub fn placeholder(&self) -> String {
        let mut token = format!("{{{{{}|{}|{}", self.name, self.field_type, self.label);
        if !self.validation_raw.is_empty() {
            token.push('|');
            token.push_str(&self.validation_raw);
        }
        token.push_str("}}");
        token
    }

    /// The prefix used for signature grouping: the name up to the first `_`.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.name.split('_').next().unwrap_or(&self.name)
    }

    /// Whether two declarations of the same name carry the same meaning.
    pub(crate) fn same_definition(&self, other: &Self) -> bool {
        self.name == other.name
            && self.field_type == other.field_type
            && self.label == other.label
            && self.validation_raw == other.validation_raw
    }
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("field name must not be empty".to_owned());
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
    {
        return Err(format!(
            "field name '{name}' may only contain lowercase letters, digits, and '_'"
        ));
    }
    Ok(())
}

/// `full_name` becomes `Full Name`.
#[must_use]
pub fn label_from_name(name: &str) -> String {
    name.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_identity_attribute(name: &str) -> bool {
    IDENTITY_ATTRIBUTES
        .iter()
        .any(|attr| name == *attr || name.ends_with(&format!("_{attr}")))
}

#[derive(Debug, Default)]
struct Directives {
    required: bool,
    autofilled: bool,
    options: Option<Vec<String>>,
    min: Option<f64>,
    max: Option<f64>,
}

impl Directives {
    fn parse(field: &str, field_type: FieldType, raw: &str) -> Self {
        let mut out = Self::default();
        if raw.is_empty() {
            return out;
        }

        for directive in raw.split('|') {
            let directive = directive.trim_start();
            let keyword = directive.trim_end();

            if keyword.eq_ignore_ascii_case("required") {
                out.required = true;
            } else if keyword.eq_ignore_ascii_case("autofilled") {
                out.autofilled = true;
            } else if let Some(value) = strip_keyword(directive, "min:") {
                if field_type == FieldType::Number {
                    out.min = parse_bound(field, "min", value);
                }
            } else if let Some(value) = strip_keyword(directive, "max:") {
                if field_type == FieldType::Number {
                    out.max = parse_bound(field, "max", value);
                }
            } else if let Some(value) = strip_keyword(directive, "options:") {
                if field_type == FieldType::Text {
                    out.options = Some(value.split(',').map(str::to_owned).collect());
                } else {
                    debug!(field, %field_type, "options directive ignored on non-text field");
                }
            } else if !keyword.is_empty() {
                debug!(field, directive = keyword, "ignoring unknown validation directive");
            }
        }
        out
    }
}

fn strip_keyword<'a>(directive: &'a str, keyword: &str) -> Option<&'a str> {
    directive
        .get(..keyword.len())
        .filter(|head| head.eq_ignore_ascii_case(keyword))
        .and_then(|_| directive.get(keyword.len()..))
}

/// Bounds that do not parse are dropped, not fatal.
fn parse_bound(field: &str, which: &str, value: &str) -> Option<f64> {
    match value.trim().parse::<f64>() {
        Ok(bound) if bound.is_finite() => Some(bound),
        _ => {
            warn!(field, bound = which, value, "non-numeric bound dropped");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn name_only_defaults_type_and_label() {
        let field = TemplateField::parse("{{full_name}}").unwrap();
        assert_eq!(field.name, "full_name");
        assert_eq!(field.field_type, FieldType::Text);
        assert_eq!(field.label, "Full Name");
        assert!(!field.required);
        assert!(field.is_autofilled);
    }

    #[test]
    fn full_placeholder_parses_all_parts() {
        let field = TemplateField::parse("{{age|number|Age|min:18|max:65|required}}").unwrap();
        assert_eq!(field.field_type, FieldType::Number);
        assert_eq!(field.label, "Age");
        assert_eq!(field.min_value, Some(18.0));
        assert_eq!(field.max_value, Some(65.0));
        assert!(field.required);
        assert_eq!(field.validation_raw, "min:18|max:65|required");
    }

    #[test]
    fn directives_are_order_independent() {
        let a = TemplateField::parse("{{n|number|N|required|max:5|min:1}}").unwrap();
        let b = TemplateField::parse("{{n|number|N|min:1|required|max:5}}").unwrap();
        assert_eq!(
            (a.required, a.min_value, a.max_value),
            (b.required, b.min_value, b.max_value)
        );
    }

    #[test]
    fn invalid_names_are_malformed() {
        for token in ["{{Name}}", "{{first-name}}", "{{}}", "{{ | text}}", "{{naïve}}"] {
            let err = TemplateField::parse(token).unwrap_err();
            assert!(matches!(err, PlaceholderError::Malformed { .. }), "{token}");
        }
    }

    #[test]
    fn surrounding_whitespace_in_name_is_tolerated() {
        let field = TemplateField::parse("{{ city |text}}").unwrap();
        assert_eq!(field.name, "city");
    }

    #[test]
    fn unknown_type_falls_back_to_text() {
        let field = TemplateField::parse("{{when|date|When}}").unwrap();
        assert_eq!(field.field_type, FieldType::Text);
        let field = TemplateField::parse("{{ok|CHECKBOX}}").unwrap();
        assert_eq!(field.field_type, FieldType::Checkbox);
    }

    #[test]
    fn non_numeric_bound_is_dropped_not_fatal() {
        let field = TemplateField::parse("{{qty|number|Qty|min:abc|max:10}}").unwrap();
        assert_eq!(field.min_value, None);
        assert_eq!(field.max_value, Some(10.0));
    }

    #[test]
    fn bounds_apply_only_to_numbers() {
        let field = TemplateField::parse("{{code|text|Code|min:1}}").unwrap();
        assert_eq!(field.min_value, None);
    }

    #[test]
    fn options_split_without_trimming() {
        let field = TemplateField::parse("{{dept|text|Dept|options:HR, IT,Ops}}").unwrap();
        assert_eq!(
            field.options,
            Some(vec!["HR".to_owned(), " IT".to_owned(), "Ops".to_owned()])
        );
    }

    #[test]
    fn options_ignored_on_non_text() {
        let field = TemplateField::parse("{{n|number|N|options:1,2}}").unwrap();
        assert_eq!(field.options, None);
    }

    #[test]
    fn autofilled_directive_and_identity_suffix() {
        assert!(TemplateField::parse("{{approver_1_name|text|Name|autofilled}}")
            .unwrap()
            .is_autofilled);
        assert!(TemplateField::parse("{{manager_email}}").unwrap().is_autofilled);
        assert!(!TemplateField::parse("{{emails_sent|number}}").unwrap().is_autofilled);
    }

    #[test]
    fn reconstructed_placeholder_parses_to_same_field() {
        for token in [
            "{{name}}",
            "{{name|text|Name|required}}",
            "{{age|number|Age|min:18|max:65}}",
            "{{agree|checkbox|I agree|required}}",
            "{{dept|text|Department|options:HR,IT|required}}",
            "{{manager_signature|signature|Manager|required}}",
            "{{n|number||max:oops}}",
        ] {
            let first = TemplateField::parse(token).unwrap();
            let again = TemplateField::parse(&first.placeholder()).unwrap();
            assert_eq!(first, again, "{token}");
        }
    }

    #[test]
    fn prefix_is_up_to_first_underscore() {
        let field = TemplateField::parse("{{manager_1_signature|signature}}").unwrap();
        assert_eq!(field.prefix(), "manager");
        let field = TemplateField::parse("{{witness|signature}}").unwrap();
        assert_eq!(field.prefix(), "witness");
    }

    #[test]
    fn pattern_finds_tokens_non_greedily() {
        let found: Vec<_> = PLACEHOLDER_PATTERN
            .find_iter("Hello {{a}} and {{b|number}}!")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(found, vec!["{{a}}", "{{b|number}}"]);
    }
}
