//! JSON source format for presentations.
//!
//! The nested form is convenient to write by hand or to produce from another
//! tool; [`SourceDocument::into_presentation`] flattens it into the arena.
//!
//! ```json
//! {
//!   "metadata": { "title": "Sample", "identifier": "uid-1" },
//!   "root": {
//!     "element": "book",
//!     "children": [
//!       { "element": "level1", "children": [
//!         { "element": "h1", "text": "Chapter 1",
//!           "audio": { "src": "ch1.mp3", "clip_begin": 0, "clip_end": "0:00:01.500" } }
//!       ] }
//!     ]
//!   }
//! }
//! ```
//!
//! Clip offsets are milliseconds, or SMIL clock values and timecounts
//! (`"0:00:01.500"`, `"1.5s"`, `"1500ms"`).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use super::{AudioClip, Attribute, ContentNode, Metadata, NodeId, Presentation, QualName};
use crate::error::Result;
use crate::smil::ClockValue;

/// Top-level JSON document.
#[derive(Debug, Deserialize)]
pub struct SourceDocument {
    #[serde(default)]
    pub metadata: Metadata,
    pub root: SourceNode,
}

/// One node of the nested JSON tree.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SourceNode {
    pub element: Option<String>,
    pub namespace: Option<String>,
    pub attributes: Vec<SourceAttribute>,
    pub text: Option<String>,
    pub audio: Option<SourceClip>,
    pub description: Option<String>,
    pub children: Vec<SourceNode>,
}

#[derive(Debug, Deserialize)]
pub struct SourceAttribute {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

/// Clip offsets in milliseconds.
#[derive(Debug, Deserialize)]
pub struct SourceClip {
    pub src: String,
    #[serde(deserialize_with = "clip_offset")]
    pub clip_begin: u64,
    #[serde(deserialize_with = "clip_offset")]
    pub clip_end: u64,
}

fn clip_offset<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Offset {
        Millis(u64),
        Clock(String),
    }

    match Offset::deserialize(deserializer)? {
        Offset::Millis(ms) => Ok(ms),
        Offset::Clock(value) => ClockValue::parse(&value)
            .map(ClockValue::millis)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid clock value `{value}`"))),
    }
}

impl SourceDocument {
    /// Parse a JSON document from a string.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Flatten the nested tree into a [`Presentation`].
    pub fn into_presentation(self) -> Presentation {
        let SourceDocument { metadata, root } = self;
        let mut tree = Presentation::new("book").with_metadata(metadata);
        let (root_node, children) = root.split();
        if let Some(node) = tree.node_mut(NodeId::ROOT) {
            *node = root_node;
        }
        for child in children {
            append_source(&mut tree, NodeId::ROOT, child);
        }
        tree
    }
}

/// Read a presentation from a JSON file.
pub fn read_presentation(path: impl AsRef<Path>) -> Result<Presentation> {
    let json = fs::read_to_string(path)?;
    Ok(SourceDocument::from_json(&json)?.into_presentation())
}

impl SourceNode {
    fn split(self) -> (ContentNode, Vec<SourceNode>) {
        let element = self.element.map(|local| QualName {
            local,
            ns: self.namespace,
        });
        let attributes = self
            .attributes
            .into_iter()
            .map(|a| Attribute {
                name: QualName {
                    local: a.name,
                    ns: a.namespace,
                },
                value: a.value,
            })
            .collect();
        let node = ContentNode {
            element,
            attributes,
            text: self.text,
            audio: self
                .audio
                .map(|c| AudioClip::new(c.src, c.clip_begin, c.clip_end)),
            description: self.description,
            parent: None,
            children: Vec::new(),
        };
        (node, self.children)
    }
}

fn append_source(tree: &mut Presentation, parent: NodeId, source: SourceNode) {
    let (mut node, children) = source.split();

    // A bare text node cannot hold children; give it a span so nothing is lost.
    if node.is_text_leaf() && !children.is_empty() {
        tracing::warn!("text node with {} children wrapped in <span>", children.len());
        node.element = Some(QualName::new("span"));
    }

    let id = tree.alloc_node(node);
    tree.append_child(parent, id);
    for child in children {
        append_source(tree, id, child);
    }
}
