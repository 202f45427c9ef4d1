//! Signature groups and signing slots.
//!
//! Groups are inferred from naming convention, not authored: fields are
//! clustered by the part of their name before the first `_`, and a cluster
//! holding at least one signature field and at least one other field is a
//! group. `manager_signature` + `manager_name` form group `manager`.
//!
//! Everything here is a pure function of the field list.

use serde::{Deserialize, Serialize};

use crate::placeholder::{FieldType, TemplateField};

/// A cluster of signature fields with their companion fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureGroup {
    /// Shared name prefix.
    pub prefix: String,
    /// First text field of the cluster, filled with the signer's name.
    pub name_field: Option<String>,
    /// Heading for the group, from its first signature field's label.
    pub section_label: String,
    /// Whether any member field is required.
    pub is_required: bool,
    /// Signature field names in field order.
    pub signature_fields: Vec<String>,
}

/// Cluster signature fields by name prefix.
///
/// Deterministic: groups come out in the order their first member appears
/// in `fields`, members in field order.
pub fn group_signature_fields(fields: &[TemplateField]) -> Vec<SignatureGroup> {
    let mut clusters: Vec<(&str, Vec<&TemplateField>)> = Vec::new();
    for field in fields {
        match clusters.iter_mut().find(|(prefix, _)| *prefix == field.prefix()) {
            Some((_, members)) => members.push(field),
            None => clusters.push((field.prefix(), vec![field])),
        }
    }

    clusters
        .into_iter()
        .filter_map(|(prefix, members)| {
            let signatures: Vec<&TemplateField> = members
                .iter()
                .copied()
                .filter(|f| f.field_type == FieldType::Signature)
                .collect();
            let first = signatures.first()?;
            if members.iter().all(|f| f.field_type == FieldType::Signature) {
                return None;
            }

            Some(SignatureGroup {
                prefix: prefix.to_owned(),
                name_field: members
                    .iter()
                    .find(|f| f.field_type == FieldType::Text)
                    .map(|f| f.name.clone()),
                section_label: first.label.clone(),
                is_required: members.iter().any(|f| f.required),
                signature_fields: signatures.iter().map(|f| f.name.clone()).collect(),
            })
        })
        .collect()
}

/// One unit of signing: a whole group, or a lone signature field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotDefinition {
    /// Group prefix, or the field name for an ungrouped field.
    pub id: String,
    /// Display label.
    pub label: String,
    /// Whether approval waits for this slot.
    pub required: bool,
    /// Signature placeholders stamped when the slot is signed.
    pub signature_fields: Vec<String>,
    /// Field that receives the signer's display name.
    pub name_field: Option<String>,
}

/// Derive the signing slots of a template, in field order.
pub fn signing_slots(fields: &[TemplateField], groups: &[SignatureGroup]) -> Vec<SlotDefinition> {
    let mut slots: Vec<SlotDefinition> = Vec::new();
    for field in fields.iter().filter(|f| f.field_type == FieldType::Signature) {
        match groups
            .iter()
            .find(|g| g.signature_fields.contains(&field.name))
        {
            Some(group) => {
                if slots.iter().any(|s| s.id == group.prefix) {
                    continue;
                }
                slots.push(SlotDefinition {
                    id: group.prefix.clone(),
                    label: group.section_label.clone(),
                    required: group.is_required,
                    signature_fields: group.signature_fields.clone(),
                    name_field: group.name_field.clone(),
                });
            }
            None => slots.push(SlotDefinition {
                id: field.name.clone(),
                label: field.label.clone(),
                required: field.required,
                signature_fields: vec![field.name.clone()],
                name_field: None,
            }),
        }
    }
    slots
}

/// Names of fields filled at signing time rather than by the author.
pub(crate) fn signer_name_fields(groups: &[SignatureGroup]) -> Vec<&str> {
    groups
        .iter()
        .filter_map(|g| g.name_field.as_deref())
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fields(tokens: &[&str]) -> Vec<TemplateField> {
        tokens
            .iter()
            .map(|t| TemplateField::parse(t).unwrap())
            .collect()
    }

    #[test]
    fn signature_with_companion_forms_a_group() {
        let fields = fields(&[
            "{{title}}",
            "{{manager_name|text|Manager Name}}",
            "{{manager_signature|signature|Manager Approval|required}}",
        ]);
        let groups = group_signature_fields(&fields);
        assert_eq!(
            groups,
            vec![SignatureGroup {
                prefix: "manager".to_owned(),
                name_field: Some("manager_name".to_owned()),
                section_label: "Manager Approval".to_owned(),
                is_required: true,
                signature_fields: vec!["manager_signature".to_owned()],
            }]
        );
    }

    #[test]
    fn lone_signature_is_not_a_group() {
        let fields = fields(&["{{witness_signature|signature}}", "{{notes}}"]);
        assert!(group_signature_fields(&fields).is_empty());
    }

    #[test]
    fn cluster_without_text_has_no_name_field() {
        let fields = fields(&["{{hr_signature|signature}}", "{{hr_confirmed|checkbox}}"]);
        let groups = group_signature_fields(&fields);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name_field, None);
        assert!(!groups[0].is_required);
    }

    #[test]
    fn grouping_is_deterministic_and_ordered_by_first_member() {
        let fields = fields(&[
            "{{b_name}}",
            "{{a_signature|signature}}",
            "{{b_signature|signature}}",
            "{{a_name}}",
            "{{b_signature_2|signature}}",
        ]);
        let first = group_signature_fields(&fields);
        let second = group_signature_fields(&fields);
        assert_eq!(first, second);
        let prefixes: Vec<_> = first.iter().map(|g| g.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["b", "a"]);
        assert_eq!(first[0].signature_fields, vec!["b_signature", "b_signature_2"]);
    }

    #[test]
    fn slots_cover_groups_and_lone_fields() {
        let fields = fields(&[
            "{{employee_name}}",
            "{{employee_signature|signature|Employee|required}}",
            "{{director_signature|signature|Director|required}}",
            "{{employee_signature_copy|signature}}",
        ]);
        let groups = group_signature_fields(&fields);
        let slots = signing_slots(&fields, &groups);
        let ids: Vec<_> = slots.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["employee", "director_signature"]);
        assert_eq!(
            slots[0].signature_fields,
            vec!["employee_signature", "employee_signature_copy"]
        );
        assert_eq!(slots[0].name_field.as_deref(), Some("employee_name"));
        assert!(slots[1].required);
        assert_eq!(signer_name_fields(&groups), vec!["employee_name"]);
    }
}
