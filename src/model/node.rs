//! Source tree node types.

/// Unique identifier for a node within a [`Presentation`](super::Presentation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    /// The root node ID (always 0).
    pub const ROOT: NodeId = NodeId(0);

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A possibly namespaced element or attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualName {
    pub local: String,
    pub ns: Option<String>,
}

impl QualName {
    /// A name in no namespace (or the document's default namespace).
    pub fn new(local: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            ns: None,
        }
    }

    pub fn with_ns(local: impl Into<String>, ns: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            ns: Some(ns.into()),
        }
    }
}

/// Namespace URI bound to the `xml:` prefix.
pub const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// A single attribute on a source node. Order of attributes is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: QualName,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: QualName::new(name),
            value: value.into(),
        }
    }

    /// Name as written in the output document (`xml:lang` for the XML namespace).
    pub fn output_name(&self) -> String {
        match self.name.ns.as_deref() {
            Some(XML_NS) => format!("xml:{}", self.name.local),
            _ => self.name.local.clone(),
        }
    }
}

/// A span of narration inside an audio asset.
///
/// Offsets are whole milliseconds so that durations add up exactly no matter
/// in which order they are accumulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    /// Asset the clip lives in, relative to the output directory once published.
    pub src: String,
    pub clip_begin: u64,
    pub clip_end: u64,
}

impl AudioClip {
    pub fn new(src: impl Into<String>, clip_begin: u64, clip_end: u64) -> Self {
        Self {
            src: src.into(),
            clip_begin,
            clip_end,
        }
    }

    /// Clip length in milliseconds. Inverted clips count as empty.
    pub fn duration(&self) -> u64 {
        self.clip_end.saturating_sub(self.clip_begin)
    }
}

/// A node in the source presentation tree.
#[derive(Debug, Clone, Default)]
pub struct ContentNode {
    /// Structural element name; `None` for bare text or grouping nodes.
    pub element: Option<QualName>,
    pub attributes: Vec<Attribute>,
    /// Narration text carried by this node.
    pub text: Option<String>,
    /// Narration audio for this node.
    pub audio: Option<AudioClip>,
    /// Externally attached description (e.g. an image description).
    pub description: Option<String>,
    /// Parent node (None for root).
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl ContentNode {
    /// Create a structural node.
    pub fn element(name: impl Into<String>) -> Self {
        Self {
            element: Some(QualName::new(name)),
            ..Default::default()
        }
    }

    /// Create a bare text leaf.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Local name of the element, if any.
    pub fn local_name(&self) -> Option<&str> {
        self.element.as_ref().map(|q| q.local.as_str())
    }

    /// Look up an attribute value by local name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.local == name)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, replacing an existing one with the same local name.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|a| a.name.local == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    /// Text without a structural element.
    pub fn is_text_leaf(&self) -> bool {
        self.element.is_none() && self.text.is_some()
    }

    /// Text plus audio without a structural element to anchor them.
    pub fn is_malformed(&self) -> bool {
        self.is_text_leaf() && self.audio.is_some()
    }
}
