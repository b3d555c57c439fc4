//! Form submission capture
//!
//! On submit the form is read the way a browser builds its form data set:
//! named, enabled controls only; checkboxes and radios only when checked;
//! buttons never. A later control with the same name overwrites an earlier
//! one. Excluded names keep their key with a `[REDACTED]` value, and file
//! inputs contribute metadata, never contents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::dom::{NodeId, Page};
use crate::types::{FieldValue, FileField, FormSubmission};

use super::filter::FieldFilter;
use super::{form_id, form_name};

/// Replacement value for excluded fields
pub const REDACTED: &str = "[REDACTED]";

/// Builds `form_submission` payloads
#[derive(Debug, Clone)]
pub struct FormSubmissionCapture {
    filter: FieldFilter,
}

impl FormSubmissionCapture {
    pub fn new(filter: FieldFilter) -> Self {
        Self { filter }
    }

    /// Extract the submission payload of `form`; `None` if it is not a form
    pub fn extract(&self, page: &Page, form: NodeId, submitted_at: DateTime<Utc>) -> Option<FormSubmission> {
        let element = page.element(form).filter(|e| e.is_form())?;
        let mut fields = BTreeMap::new();

        for control in page.form_controls(form) {
            let Some(name) = control.attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            if control.is_disabled() {
                continue;
            }

            let input_type = control.input_type();
            let value = match input_type.as_str() {
                "submit" | "button" | "reset" | "image" => continue,
                "checkbox" | "radio" if !control.is_checked() => continue,
                "file" => match control.files().last() {
                    Some(file) => FieldValue::File(FileField {
                        name: file.name.clone(),
                        size: file.size,
                        mime_type: file.mime_type.clone(),
                    }),
                    None => continue,
                },
                _ => FieldValue::Text(control.value().to_string()),
            };

            let value = if self.filter.is_excluded(name) {
                FieldValue::Text(REDACTED.to_string())
            } else {
                value
            };
            fields.insert(name.to_string(), value);
        }

        let form_action = element
            .attr("action")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        Some(FormSubmission {
            form_id: form_id(&element),
            form_name: form_name(&element),
            form_action,
            fields,
            submitted_at,
        })
    }

    /// Redact excluded names in host-supplied fields
    pub fn redact(&self, fields: BTreeMap<String, FieldValue>) -> BTreeMap<String, FieldValue> {
        fields
            .into_iter()
            .map(|(name, value)| {
                if self.filter.is_excluded(&name) {
                    (name, FieldValue::Text(REDACTED.to_string()))
                } else {
                    (name, value)
                }
            })
            .collect()
    }
}
