//! Form completion progress

use crate::dom::{NodeId, Page};
use crate::types::FormProgress;
use crate::utils;

/// Completion of `form`: filled controls over all non-hidden
/// `input`/`textarea`/`select` controls
///
/// Checkboxes and radios count as filled when checked; everything else when
/// its value has a non-whitespace character.
pub fn form_progress(page: &Page, form: NodeId) -> FormProgress {
    let mut total = 0usize;
    let mut filled = 0usize;
    let mut completed = Vec::new();

    for control in page.form_controls(form) {
        if control.tag() == "button" {
            continue;
        }
        let input_type = control.input_type();
        if input_type == "hidden" {
            continue;
        }
        total += 1;

        let is_filled = match input_type.as_str() {
            "checkbox" | "radio" => control.is_checked(),
            _ => utils::is_filled(control.value()),
        };
        if is_filled {
            filled += 1;
            // unnamed controls count toward the percentage only
            if let Some(name) = control.name() {
                completed.push(name.to_string());
            }
        }
    }

    let percent_complete = if total == 0 {
        0
    } else {
        ((filled as f64 / total as f64) * 100.0).round() as u32
    };

    FormProgress {
        completed_fields: completed,
        total_fields: total,
        percent_complete,
    }
}
