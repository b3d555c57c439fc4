//! Attachment of capture to forms, including forms added after load
//!
//! The watcher keeps the registry of forms capture is attached to, keyed by
//! node id. A form is attached when it matches the capture selector, either
//! in the initial scan or inside a subtree added by a later mutation.
//! Attaching twice is a no-op. Removal is reported before the page mirror
//! drops the nodes, so pending state can still be read.

use crate::dom::{NodeId, Page, Selector};

/// Registry of captured forms
#[derive(Debug, Clone)]
pub struct DomWatcher {
    selector: Selector,
    /// Attachment order
    attached: Vec<NodeId>,
}

impl DomWatcher {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            attached: Vec::new(),
        }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Attach every matching form already on the page
    ///
    /// Returns the newly attached forms.
    pub fn scan(&mut self, page: &Page) -> Vec<NodeId> {
        let forms = page.query_forms(None, &self.selector);
        self.attach_all(forms)
    }

    /// Attach matching forms inside freshly added subtrees
    pub fn on_added(&mut self, page: &Page, roots: &[NodeId]) -> Vec<NodeId> {
        let forms: Vec<NodeId> = roots
            .iter()
            .flat_map(|root| page.query_forms(Some(*root), &self.selector))
            .collect();
        self.attach_all(forms)
    }

    fn attach_all(&mut self, forms: Vec<NodeId>) -> Vec<NodeId> {
        let mut newly = Vec::new();
        for form in forms {
            if self.attach(form) {
                newly.push(form);
            }
        }
        newly
    }

    /// Attach one form; false if it was already attached
    pub fn attach(&mut self, form: NodeId) -> bool {
        if self.attached.contains(&form) {
            return false;
        }
        tracing::debug!(form = %form, "Attached form capture");
        self.attached.push(form);
        true
    }

    /// Attached forms inside the subtree rooted at `root` (inclusive)
    ///
    /// Call before the page mirror removes the subtree.
    pub fn attached_within(&self, page: &Page, root: NodeId) -> Vec<NodeId> {
        page.subtree(root)
            .into_iter()
            .filter(|id| self.attached.contains(id))
            .collect()
    }

    /// Detach a form; false if it was not attached
    pub fn detach(&mut self, form: NodeId) -> bool {
        let before = self.attached.len();
        self.attached.retain(|f| *f != form);
        let removed = self.attached.len() != before;
        if removed {
            tracing::debug!(form = %form, "Detached form capture");
        }
        removed
    }

    pub fn is_attached(&self, form: NodeId) -> bool {
        self.attached.contains(&form)
    }

    /// Attached forms in attachment order
    pub fn attached(&self) -> &[NodeId] {
        &self.attached
    }
}
