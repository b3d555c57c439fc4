//! Page mirror
//!
//! The engine does not run inside a browser, so the host registers the parts of
//! the document it cares about: element subtrees arrive as [`ElementNode`]s in
//! mutation records, control values arrive with input events. [`Page`] keeps
//! those nodes in an arena keyed by the host's [`NodeId`]s and answers the
//! handful of queries capture needs (forms matching a selector, the controls of
//! a form, the form owning a control).

mod selector;

pub use selector::Selector;

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Host-assigned identifier of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// File selected in a file input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// An element subtree as registered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub id: NodeId,
    pub tag: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    /// Current value, when it differs from the `value` attribute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ElementNode>,
}

impl ElementNode {
    pub fn new(id: u64, tag: &str) -> Self {
        Self {
            id: NodeId(id),
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
            value: None,
            checked: false,
            files: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = Some(value.to_string());
        self
    }

    pub fn checked(mut self, checked: bool) -> Self {
        self.checked = checked;
        self
    }

    pub fn file(mut self, file: FileInfo) -> Self {
        self.files.push(file);
        self
    }

    pub fn child(mut self, child: ElementNode) -> Self {
        self.children.push(child);
        self
    }

    /// Convenience for `<input type=.. name=..>`
    pub fn input(id: u64, input_type: &str, name: &str) -> Self {
        Self::new(id, "input")
            .attr("type", input_type)
            .attr("name", name)
    }
}

#[derive(Debug, Clone)]
struct NodeData {
    tag: String,
    attributes: BTreeMap<String, String>,
    value: Option<String>,
    checked: bool,
    files: Vec<FileInfo>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Arena of registered elements
#[derive(Debug, Default, Clone)]
pub struct Page {
    nodes: HashMap<NodeId, NodeData>,
    roots: Vec<NodeId>,
}

impl Page {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Attach `node` (and its subtree) under `parent`, or at the top level.
    ///
    /// Re-registering an id that is already present moves it: the old subtree
    /// is dropped first. Returns the inserted ids in document order.
    pub fn insert(&mut self, parent: Option<NodeId>, node: ElementNode) -> Result<Vec<NodeId>> {
        if let Some(parent) = parent {
            if !self.contains(parent) {
                return Err(Error::UnknownNode(parent.0));
            }
        }
        if self.contains(node.id) {
            self.remove(node.id)?;
            // the move may have taken the parent with it
            if let Some(parent) = parent.filter(|p| !self.contains(*p)) {
                return Err(Error::UnknownNode(parent.0));
            }
        }

        let mut inserted = Vec::new();
        match parent {
            Some(parent) => {
                if let Some(data) = self.nodes.get_mut(&parent) {
                    data.children.push(node.id);
                }
            }
            None => self.roots.push(node.id),
        }
        self.insert_subtree(parent, node, &mut inserted);
        Ok(inserted)
    }

    fn insert_subtree(&mut self, parent: Option<NodeId>, node: ElementNode, out: &mut Vec<NodeId>) {
        let id = node.id;
        let checked = node.checked || node.attributes.contains_key("checked");
        let children: Vec<NodeId> = node.children.iter().map(|c| c.id).collect();

        self.nodes.insert(
            id,
            NodeData {
                tag: node.tag.to_ascii_lowercase(),
                attributes: node.attributes,
                value: node.value,
                checked,
                files: node.files,
                parent,
                children,
            },
        );
        out.push(id);

        for child in node.children {
            self.insert_subtree(Some(id), child, out);
        }
    }

    /// Detach `id` and its subtree. Returns the removed ids in document order.
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let parent = match self.nodes.get(&id) {
            Some(data) => data.parent,
            None => return Err(Error::UnknownNode(id.0)),
        };

        match parent {
            Some(parent) => {
                if let Some(data) = self.nodes.get_mut(&parent) {
                    data.children.retain(|child| *child != id);
                }
            }
            None => self.roots.retain(|root| *root != id),
        }

        let removed = self.subtree(id);
        for node in &removed {
            self.nodes.remove(node);
        }
        Ok(removed)
    }

    pub fn set_value(&mut self, id: NodeId, value: &str) -> Result<()> {
        let data = self.node_mut(id)?;
        data.value = Some(value.to_string());
        Ok(())
    }

    pub fn set_checked(&mut self, id: NodeId, checked: bool) -> Result<()> {
        self.node_mut(id)?.checked = checked;
        Ok(())
    }

    pub fn set_files(&mut self, id: NodeId, files: Vec<FileInfo>) -> Result<()> {
        self.node_mut(id)?.files = files;
        Ok(())
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeData> {
        self.nodes.get_mut(&id).ok_or(Error::UnknownNode(id.0))
    }

    pub fn element(&self, id: NodeId) -> Option<Element<'_>> {
        self.nodes.get(&id).map(|data| Element { id, data })
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(&id).and_then(|data| data.parent)
    }

    /// `id` followed by all of its descendants, in document order
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(data) = self.nodes.get(&current) else {
                continue;
            };
            out.push(current);
            stack.extend(data.children.iter().rev().copied());
        }
        out
    }

    /// Every node in document order
    pub fn all_nodes(&self) -> Vec<NodeId> {
        self.roots
            .iter()
            .flat_map(|root| self.subtree(*root))
            .collect()
    }

    /// Elements matching `selector` inside `root` (inclusive), or in the
    /// whole page when `root` is `None`
    pub fn query(&self, root: Option<NodeId>, selector: &Selector) -> Vec<NodeId> {
        let candidates = match root {
            Some(root) => self.subtree(root),
            None => self.all_nodes(),
        };
        candidates
            .into_iter()
            .filter(|id| selector.matches(self, *id))
            .collect()
    }

    /// Forms matching `selector` inside `root` (inclusive)
    pub fn query_forms(&self, root: Option<NodeId>, selector: &Selector) -> Vec<NodeId> {
        self.query(root, selector)
            .into_iter()
            .filter(|id| self.element(*id).is_some_and(|e| e.is_form()))
            .collect()
    }

    /// Nearest `<form>` ancestor of `id`
    pub fn form_of(&self, id: NodeId) -> Option<NodeId> {
        let mut current = self.parent(id);
        while let Some(ancestor) = current {
            if self.element(ancestor).is_some_and(|e| e.is_form()) {
                return Some(ancestor);
            }
            current = self.parent(ancestor);
        }
        None
    }

    /// Controls (`input`, `textarea`, `select`, `button`) inside `form`,
    /// in document order
    pub fn form_controls(&self, form: NodeId) -> Vec<Element<'_>> {
        self.subtree(form)
            .into_iter()
            .skip(1)
            .filter_map(|id| self.element(id))
            .filter(|element| element.is_control())
            .collect()
    }
}

/// Read-only view of one element
#[derive(Debug, Clone, Copy)]
pub struct Element<'a> {
    id: NodeId,
    data: &'a NodeData,
}

impl<'a> Element<'a> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Lowercase tag name
    pub fn tag(&self) -> &'a str {
        &self.data.tag
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.data.attributes.get(name).map(String::as_str)
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.data.attributes.contains_key(name)
    }

    /// Field name: the `name` attribute, falling back to `id`
    pub fn name(&self) -> Option<&'a str> {
        self.attr("name")
            .filter(|name| !name.is_empty())
            .or_else(|| self.attr("id").filter(|id| !id.is_empty()))
    }

    /// Control type as a browser reports it (`text`, `select-one`, `textarea`...)
    pub fn input_type(&self) -> String {
        match self.tag() {
            "input" => self
                .attr("type")
                .map(str::to_ascii_lowercase)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "text".to_string()),
            "select" if self.has_attr("multiple") => "select-multiple".to_string(),
            "select" => "select-one".to_string(),
            "button" => self
                .attr("type")
                .map(str::to_ascii_lowercase)
                .unwrap_or_else(|| "submit".to_string()),
            other => other.to_string(),
        }
    }

    /// Current value; checkboxes and radios without a value report `on`
    pub fn value(&self) -> &'a str {
        if let Some(value) = self.data.value.as_deref() {
            return value;
        }
        if let Some(value) = self.attr("value") {
            return value;
        }
        match self.input_type().as_str() {
            "checkbox" | "radio" => "on",
            _ => "",
        }
    }

    pub fn is_checked(&self) -> bool {
        self.data.checked
    }

    pub fn is_disabled(&self) -> bool {
        self.has_attr("disabled")
    }

    pub fn files(&self) -> &'a [FileInfo] {
        &self.data.files
    }

    pub fn is_form(&self) -> bool {
        self.tag() == "form"
    }

    pub fn is_control(&self) -> bool {
        matches!(self.tag(), "input" | "textarea" | "select" | "button")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact_page() -> Page {
        let mut page = Page::new();
        page.insert(
            None,
            ElementNode::new(1, "BODY").child(
                ElementNode::new(10, "form")
                    .attr("id", "contact")
                    .child(ElementNode::input(11, "email", "email"))
                    .child(ElementNode::new(12, "div").child(ElementNode::input(13, "text", "company")))
                    .child(ElementNode::new(14, "select").attr("name", "size"))
                    .child(ElementNode::new(15, "button")),
            ),
        )
        .unwrap();
        page
    }

    #[test]
    fn test_insert_and_query() {
        let page = contact_page();
        assert_eq!(page.len(), 7);
        assert_eq!(page.element(NodeId(1)).unwrap().tag(), "body");

        let forms = page.query_forms(None, &Selector::forms());
        assert_eq!(forms, vec![NodeId(10)]);

        let controls: Vec<NodeId> = page.form_controls(NodeId(10)).iter().map(|c| c.id()).collect();
        assert_eq!(controls, vec![NodeId(11), NodeId(13), NodeId(14), NodeId(15)]);
        assert_eq!(page.form_of(NodeId(13)), Some(NodeId(10)));
        assert_eq!(page.form_of(NodeId(1)), None);
    }

    #[test]
    fn test_remove_subtree() {
        let mut page = contact_page();
        let removed = page.remove(NodeId(10)).unwrap();

        assert_eq!(removed.len(), 6);
        assert_eq!(removed[0], NodeId(10));
        assert_eq!(page.len(), 1);
        assert!(page.query_forms(None, &Selector::forms()).is_empty());
        assert!(matches!(page.remove(NodeId(10)), Err(Error::UnknownNode(10))));
    }

    #[test]
    fn test_insert_under_unknown_parent() {
        let mut page = Page::new();
        let result = page.insert(Some(NodeId(5)), ElementNode::new(6, "form"));
        assert!(matches!(result, Err(Error::UnknownNode(5))));
        assert!(page.is_empty());
    }

    #[test]
    fn test_reinsert_moves_node() {
        let mut page = contact_page();
        page.insert(None, ElementNode::input(13, "text", "company")).unwrap();

        assert_eq!(page.form_of(NodeId(13)), None);
        assert_eq!(page.form_controls(NodeId(10)).len(), 3);
    }

    #[test]
    fn test_element_values_and_types() {
        let mut page = Page::new();
        page.insert(
            None,
            ElementNode::new(1, "form")
                .child(ElementNode::input(2, "checkbox", "optin").attr("checked", ""))
                .child(ElementNode::new(3, "input").attr("id", "nickname").attr("value", "bob"))
                .child(ElementNode::new(4, "select").attr("name", "tags").attr("multiple", ""))
                .child(ElementNode::new(5, "textarea").attr("name", "notes")),
        )
        .unwrap();

        let optin = page.element(NodeId(2)).unwrap();
        assert_eq!(optin.input_type(), "checkbox");
        assert_eq!(optin.value(), "on");
        assert!(optin.is_checked());

        let nickname = page.element(NodeId(3)).unwrap();
        assert_eq!(nickname.name(), Some("nickname"));
        assert_eq!(nickname.input_type(), "text");
        assert_eq!(nickname.value(), "bob");

        page.set_value(NodeId(3), "robert").unwrap();
        assert_eq!(page.element(NodeId(3)).unwrap().value(), "robert");

        assert_eq!(page.element(NodeId(4)).unwrap().input_type(), "select-multiple");
        assert_eq!(page.element(NodeId(5)).unwrap().input_type(), "textarea");
        assert!(page.set_checked(NodeId(99), true).is_err());
    }
}
