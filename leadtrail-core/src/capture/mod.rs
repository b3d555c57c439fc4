//! Form capture
//!
//! - [`DomWatcher`] decides which forms are captured, including forms that
//!   appear after the initial page load
//! - [`FieldInteractionTracker`] turns blur/change activity into
//!   `form_interaction` payloads (batched or field-by-field)
//! - [`FormSubmissionCapture`] extracts and redacts `form_submission` payloads
//! - [`FieldFilter`] and [`form_progress`] are shared by all of them
//!
//! Capture code only produces payloads; stamping them into events and
//! queueing them is the engine's job.

mod fields;
mod filter;
mod progress;
mod submission;
mod watcher;

pub use fields::{CaptureStrategy, Emission, FieldInteractionTracker, FieldState, TrackedForm};
pub use filter::FieldFilter;
pub use progress::form_progress;
pub use submission::{FormSubmissionCapture, REDACTED};
pub use watcher::DomWatcher;

use sha2::{Digest, Sha256};

use crate::dom::Element;

/// Stable identifier of a form across re-renders
///
/// The `id` attribute, then `name`, then `data-form-id`; otherwise `form_`
/// followed by the first 10 hex characters of SHA-256(action + method).
pub fn form_id(form: &Element<'_>) -> String {
    for attr in ["id", "name", "data-form-id"] {
        if let Some(value) = form.attr(attr).map(str::trim).filter(|v| !v.is_empty()) {
            return value.to_string();
        }
    }

    let action = form.attr("action").unwrap_or("");
    let method = form
        .attr("method")
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "get".to_string());

    let mut hasher = Sha256::new();
    hasher.update(action.as_bytes());
    hasher.update(method.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("form_{}", &digest[..10])
}

/// Display name of a form
///
/// `data-form-name`, then `name`, then `id`, else `"Unnamed Form"`.
pub fn form_name(form: &Element<'_>) -> String {
    ["data-form-name", "name", "id"]
        .iter()
        .filter_map(|attr| form.attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .unwrap_or("Unnamed Form")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::{ElementNode, NodeId, Page};

    fn element(node: ElementNode) -> (Page, NodeId) {
        let id = node.id;
        let mut page = Page::new();
        page.insert(None, node).unwrap();
        (page, id)
    }

    #[test]
    fn test_form_id_precedence() {
        let (page, id) = element(
            ElementNode::new(1, "form")
                .attr("id", "contact")
                .attr("name", "c")
                .attr("data-form-id", "d"),
        );
        assert_eq!(form_id(&page.element(id).unwrap()), "contact");

        let (page, id) = element(ElementNode::new(1, "form").attr("name", "c").attr("data-form-id", "d"));
        assert_eq!(form_id(&page.element(id).unwrap()), "c");

        let (page, id) = element(ElementNode::new(1, "form").attr("data-form-id", "d"));
        assert_eq!(form_id(&page.element(id).unwrap()), "d");
    }

    #[test]
    fn test_form_id_hash_is_stable() {
        let (page, id) = element(ElementNode::new(1, "form").attr("action", "/signup").attr("method", "POST"));
        let first = form_id(&page.element(id).unwrap());

        // same action+method on a re-rendered node
        let (page, id) = element(ElementNode::new(7, "form").attr("action", "/signup").attr("method", "post"));
        let second = form_id(&page.element(id).unwrap());

        assert_eq!(first, second);
        assert!(first.starts_with("form_"));
        assert_eq!(first.len(), 15);

        let (page, id) = element(ElementNode::new(1, "form").attr("action", "/other"));
        assert_ne!(form_id(&page.element(id).unwrap()), first);
    }

    #[test]
    fn test_form_name_precedence() {
        let (page, id) = element(ElementNode::new(1, "form").attr("data-form-name", "Lead Form").attr("id", "x"));
        assert_eq!(form_name(&page.element(id).unwrap()), "Lead Form");

        let (page, id) = element(ElementNode::new(1, "form").attr("id", "contact"));
        assert_eq!(form_name(&page.element(id).unwrap()), "contact");

        let (page, id) = element(ElementNode::new(1, "form").attr("name", "  "));
        assert_eq!(form_name(&page.element(id).unwrap()), "Unnamed Form");
    }
}
