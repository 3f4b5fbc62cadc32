//! Source presentation tree.
//!
//! A [`Presentation`] is an arena of [`ContentNode`]s: children are stored as
//! index lists and the parent as an optional index, so the tree can be walked
//! in both directions without reference cycles.
//!
//! # Example
//!
//! ```
//! use daisybook::model::{AudioClip, Presentation};
//!
//! let mut book = Presentation::new("book");
//! let root = book.root();
//! let level = book.append_element(root, "level1");
//! let h1 = book.append_element(level, "h1");
//! book.append_text(h1, "Chapter 1");
//! book.set_audio(h1, AudioClip::new("chapter1.mp3", 0, 1200));
//!
//! assert_eq!(book.flattened_text(level), "Chapter 1");
//! ```

mod metadata;
mod node;

#[cfg(feature = "cli")]
pub mod json;

use std::collections::HashMap;

pub use metadata::Metadata;
pub use node::{AudioClip, Attribute, ContentNode, NodeId, QualName, XML_NS};

/// A narrated document tree plus its metadata.
#[derive(Debug, Clone)]
pub struct Presentation {
    /// All nodes in the tree (index 0 is always the root).
    nodes: Vec<ContentNode>,
    pub metadata: Metadata,
}

impl Presentation {
    /// Create a presentation whose root is the element `root_element`.
    pub fn new(root_element: &str) -> Self {
        Self {
            nodes: vec![ContentNode::element(root_element)],
            metadata: Metadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Get the root node ID.
    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    /// Get a node by ID.
    pub fn node(&self, id: NodeId) -> Option<&ContentNode> {
        self.nodes.get(id.index())
    }

    /// Get a mutable node by ID.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut ContentNode> {
        self.nodes.get_mut(id.index())
    }

    /// Get the number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Allocate a detached node and return its ID.
    pub fn alloc_node(&mut self, node: ContentNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Append a child node to a parent.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(child_node) = self.nodes.get_mut(child.index()) {
            child_node.parent = Some(parent);
        }
        if let Some(parent_node) = self.nodes.get_mut(parent.index()) {
            parent_node.children.push(child);
        }
    }

    /// Allocate an element and append it under `parent`.
    pub fn append_element(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.alloc_node(ContentNode::element(name));
        self.append_child(parent, id);
        id
    }

    /// Allocate a text leaf and append it under `parent`.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let id = self.alloc_node(ContentNode::text(text));
        self.append_child(parent, id);
        id
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            node.set_attribute(name, value);
        }
    }

    pub fn set_audio(&mut self, id: NodeId, clip: AudioClip) {
        if let Some(node) = self.node_mut(id) {
            node.audio = Some(clip);
        }
    }

    pub fn set_description(&mut self, id: NodeId, description: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            node.description = Some(description.into());
        }
    }

    /// Children of a node, in document order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Iterate over the strict ancestors of a node, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            current: self.parent(id),
        }
    }

    /// Whether `ancestor` is a strict ancestor of `id`.
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        self.ancestors(id).any(|a| a == ancestor)
    }

    /// Iterate over all nodes in depth-first order.
    pub fn iter_dfs(&self) -> DfsIter<'_> {
        self.iter_dfs_from(NodeId::ROOT)
    }

    /// Iterate over a subtree in depth-first order, starting with `id`.
    pub fn iter_dfs_from(&self, id: NodeId) -> DfsIter<'_> {
        DfsIter {
            tree: self,
            stack: vec![id],
        }
    }

    /// All text in the subtree, concatenated in document order.
    pub fn flattened_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node_id in self.iter_dfs_from(id) {
            if let Some(text) = self.node(node_id).and_then(|n| n.text.as_deref()) {
                out.push_str(text);
            }
        }
        out
    }

    /// Text owned by the node itself or by its bare text-leaf children.
    pub fn direct_text(&self, id: NodeId) -> String {
        let Some(node) = self.node(id) else {
            return String::new();
        };
        let mut out = node.text.clone().unwrap_or_default();
        for &child in &node.children {
            if let Some(child) = self.node(child)
                && child.is_text_leaf()
                && let Some(text) = &child.text
            {
                out.push_str(text);
            }
        }
        out
    }

    /// Map from source `id` attribute values to nodes. First occurrence wins.
    pub fn id_index(&self) -> HashMap<String, NodeId> {
        let mut index = HashMap::new();
        for id in self.iter_dfs() {
            if let Some(value) = self.node(id).and_then(|n| n.attribute("id")) {
                index.entry(value.to_string()).or_insert(id);
            }
        }
        index
    }

    /// For every node, whether it or any descendant carries an audio clip.
    pub fn audio_coverage(&self) -> Vec<bool> {
        let mut covered: Vec<bool> = self.nodes.iter().map(|n| n.audio.is_some()).collect();
        // Reverse pre-order visits every descendant before its ancestors.
        let order: Vec<NodeId> = self.iter_dfs().collect();
        for &id in order.iter().rev() {
            if covered[id.index()]
                && let Some(parent) = self.parent(id)
            {
                covered[parent.index()] = true;
            }
        }
        covered
    }

    /// Iterate mutably over all nodes, in allocation order.
    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut ContentNode> {
        self.nodes.iter_mut()
    }
}

/// Iterator over the ancestors of a node.
pub struct Ancestors<'a> {
    tree: &'a Presentation,
    current: Option<NodeId>,
}

impl Iterator for Ancestors<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.parent(current);
        Some(current)
    }
}

/// Depth-first iterator over a subtree.
pub struct DfsIter<'a> {
    tree: &'a Presentation,
    stack: Vec<NodeId>,
}

impl Iterator for DfsIter<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.stack.pop()?;

        // Push children in reverse order so they're visited left-to-right
        self.stack
            .extend(self.tree.children(current).iter().rev().copied());

        Some(current)
    }
}
