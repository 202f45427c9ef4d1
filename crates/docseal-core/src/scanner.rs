//! Template scanner.
//!
//! Walks every paragraph of a template (body, table cells, text boxes,
//! headers, footers) and turns the placeholders it finds into the
//! template's field list. Matching runs against the paragraph's logical
//! text, so tokens split across runs are found.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::docx::Package;
use crate::docx::runs::{for_each_paragraph, paragraph_text};
use crate::docx::xml;
use crate::error::{PlaceholderError, ScanError};
use crate::placeholder::{PLACEHOLDER_PATTERN, TemplateField};
use crate::signature_group::{SignatureGroup, group_signature_fields};

/// A placeholder that was skipped because it is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    /// Part the token was found in.
    pub part: String,
    /// The token as written.
    pub token: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Result of scanning a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    /// Fields in first-occurrence order.
    pub fields: Vec<TemplateField>,
    /// Signature groups derived from `fields`.
    pub signature_groups: Vec<SignatureGroup>,
    /// Malformed placeholders.
    pub warnings: Vec<ScanWarning>,
}

/// Scan a `.docx` template.
///
/// # Errors
///
/// Returns [`ScanError::Package`] if the bytes are not a readable package
/// and [`ScanError::ConflictingFieldDefinition`] if one name is used with two
/// types.
pub fn scan(template: &[u8]) -> Result<ScanReport, ScanError> {
    let mut package = Package::open(template)?;
    let mut collector = FieldCollector::default();

    for part in package.content_parts() {
        let bytes = package.read(&part)?;
        let doc = xml::parse(&part, &bytes)?;
        let mut paragraphs = Vec::new();
        for_each_paragraph(&doc.root, &mut |p| paragraphs.push(paragraph_text(p)));
        for text in &paragraphs {
            collector.scan_text(&part, text)?;
        }
    }

    let report = collector.finish();
    info!(
        fields = report.fields.len(),
        signature_groups = report.signature_groups.len(),
        warnings = report.warnings.len(),
        "template scanned"
    );
    Ok(report)
}

/// Scan already-extracted paragraph texts. The document walk is the only
/// difference from [`scan`].
///
/// # Errors
///
/// Returns [`ScanError::ConflictingFieldDefinition`] if one name is used with
/// two types.
pub fn scan_paragraphs<'a>(
    paragraphs: impl IntoIterator<Item = &'a str>,
) -> Result<ScanReport, ScanError> {
    let mut collector = FieldCollector::default();
    for text in paragraphs {
        collector.scan_text("text", text)?;
    }
    Ok(collector.finish())
}

#[derive(Debug, Default)]
struct FieldCollector {
    fields: Vec<TemplateField>,
    warnings: Vec<ScanWarning>,
}

impl FieldCollector {
    fn scan_text(&mut self, part: &str, text: &str) -> Result<(), ScanError> {
        for caps in PLACEHOLDER_PATTERN.captures_iter(text) {
            let (Some(token), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            match TemplateField::parse_inner(token.as_str(), inner.as_str()) {
                Ok(field) => self.add(field)?,
                Err(PlaceholderError::Malformed { token, reason }) => {
                    warn!(part, token = %token, reason = %reason, "malformed placeholder skipped");
                    self.warnings.push(ScanWarning {
                        part: part.to_owned(),
                        token,
                        reason,
                    });
                }
            }
        }
        Ok(())
    }

    fn add(&mut self, field: TemplateField) -> Result<(), ScanError> {
        let Some(existing) = self.fields.iter_mut().find(|f| f.name == field.name) else {
            self.fields.push(field);
            return Ok(());
        };

        if existing.field_type != field.field_type {
            return Err(ScanError::ConflictingFieldDefinition {
                name: field.name,
                first_type: existing.field_type.to_string(),
                second_type: field.field_type.to_string(),
            });
        }

        existing.occurrences += 1;
        if existing.same_definition(&field) {
            debug!(field = %field.name, occurrences = existing.occurrences, "repeated placeholder");
        } else {
            debug!(
                field = %field.name,
                kept = %existing.placeholder(),
                ignored = %field.placeholder(),
                "repeated placeholder differs; first occurrence wins"
            );
        }
        Ok(())
    }

    fn finish(self) -> ScanReport {
        let signature_groups = group_signature_fields(&self.fields);
        ScanReport {
            fields: self.fields,
            signature_groups,
            warnings: self.warnings,
        }
    }
}
