//! Content document (DTBook) generation.
//!
//! [`ContentDocumentBuilder`] walks the source tree once and produces the
//! structural document. Every `id` is regenerated; the old -> new mapping is
//! kept in an [`IdentifierMap`] and attributes that point at ids are collected
//! as [`ReferenceAttribute`]s so that [`ReferenceResolver`] can rewrite them
//! once every id is known.

mod resolve;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::classify::{self, PartitionPolicy};
use crate::error::Result;
use crate::ids::{IdNamespace, IdentifierAllocator};
use crate::model::{Metadata, NodeId, Presentation};
use crate::xml::{XmlDocument, XmlNodeId};

pub use resolve::{ReferenceResolver, ResolveReport, reference_key};

const DTBOOK_DOCTYPE: &str = r#"<!DOCTYPE dtbook PUBLIC "-//NISO//DTD dtbook 2005-3//EN" "http://www.daisy.org/z3986/2005/dtbook-2005-3.dtd">"#;
const DTBOOK_NS: &str = "http://www.daisy.org/z3986/2005/dtbook/";

/// Original id -> regenerated id, scoped to one export.
///
/// Entries are write-once: the first mapping for an original id is kept.
#[derive(Debug, Default, Clone)]
pub struct IdentifierMap {
    forward: HashMap<String, String>,
}

impl IdentifierMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping. Returns `false` (leaving the map unchanged) when the
    /// original id was already mapped.
    pub fn insert(&mut self, original: &str, new: &str) -> bool {
        if self.forward.contains_key(original) {
            return false;
        }
        self.forward.insert(original.to_string(), new.to_string());
        true
    }

    /// Regenerated id for an original id.
    pub fn get(&self, original: &str) -> Option<&str> {
        self.forward.get(original).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// An attribute whose value references an original id, pending resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceAttribute {
    /// Element of the generated document that owns the attribute.
    pub element: XmlNodeId,
    pub name: String,
    /// Value as found in the source tree.
    pub raw: String,
}

/// The generated content document and its cross-reference tables.
#[derive(Debug, Clone)]
pub struct ContentDocument {
    pub xml: XmlDocument,
    pub file_name: String,
    pub id_map: IdentifierMap,
    pub references: Vec<ReferenceAttribute>,
    /// Original ids seen more than once.
    pub duplicate_ids: Vec<String>,
    elements: HashMap<NodeId, XmlNodeId>,
}

impl ContentDocument {
    /// Generated element for a source node.
    pub fn element_for(&self, node: NodeId) -> Option<XmlNodeId> {
        self.elements.get(&node).copied()
    }

    /// Regenerated id of the element generated for `node`.
    pub fn anchor_id(&self, node: NodeId) -> Option<&str> {
        self.element_for(node).and_then(|e| self.xml.attr(e, "id"))
    }

    /// Point `element` at its synchronization anchor. The first anchor wins.
    pub fn set_smilref(&mut self, element: XmlNodeId, smilref: &str) -> bool {
        if self.xml.attr(element, "smilref").is_some() {
            return false;
        }
        self.xml.set_attr(element, "smilref", smilref);
        true
    }

    /// Write the document into `dir`.
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(&self.file_name);
        self.xml.write_to(&path)?;
        Ok(path)
    }
}

/// Builds the content document from a presentation.
pub struct ContentDocumentBuilder<'a, P: PartitionPolicy + ?Sized> {
    tree: &'a Presentation,
    policy: &'a P,
    ids: &'a mut IdentifierAllocator,
    file_name: String,
}

impl<'a, P: PartitionPolicy + ?Sized> ContentDocumentBuilder<'a, P> {
    pub fn new(tree: &'a Presentation, policy: &'a P, ids: &'a mut IdentifierAllocator) -> Self {
        Self {
            tree,
            policy,
            ids,
            file_name: "dtbook.xml".to_string(),
        }
    }

    /// Override the output file name (default `dtbook.xml`).
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Walk the tree and produce the document. References stay unresolved.
    pub fn build(self) -> ContentDocument {
        let mut doc = ContentDocument {
            xml: XmlDocument::new("dtbook", Some(DTBOOK_DOCTYPE)),
            file_name: self.file_name.clone(),
            id_map: IdentifierMap::new(),
            references: Vec::new(),
            duplicate_ids: Vec::new(),
            elements: HashMap::new(),
        };
        let xml_root = doc.xml.root();
        doc.xml.set_attr(xml_root, "xmlns", DTBOOK_NS);
        doc.xml.set_attr(xml_root, "version", "2005-3");
        doc.xml
            .set_attr(xml_root, "xml:lang", self.tree.metadata.language_or_default());

        let mut walk = BuildWalk {
            tree: self.tree,
            policy: self.policy,
            ids: self.ids,
            doc: &mut doc,
        };

        let root = self.tree.root();
        let root_is_dtbook = self
            .tree
            .node(root)
            .and_then(|n| n.local_name())
            .is_some_and(|name| name == "dtbook");
        if root_is_dtbook {
            walk.copy_attributes(root, xml_root);
            walk.doc.elements.insert(root, xml_root);
            for &child in self.tree.children(root) {
                walk.visit(child, xml_root);
            }
        } else {
            walk.visit(root, xml_root);
        }

        let has_head = doc
            .xml
            .children(xml_root)
            .iter()
            .any(|&c| doc.xml.name(c) == Some("head"));
        if !has_head {
            write_head(&mut doc.xml, &self.tree.metadata);
        }

        tracing::debug!(
            ids = doc.id_map.len(),
            references = doc.references.len(),
            "content document built"
        );
        doc
    }
}

struct BuildWalk<'w, P: PartitionPolicy + ?Sized> {
    tree: &'w Presentation,
    policy: &'w P,
    ids: &'w mut IdentifierAllocator,
    doc: &'w mut ContentDocument,
}

impl<P: PartitionPolicy + ?Sized> BuildWalk<'_, P> {
    fn visit(&mut self, id: NodeId, parent: XmlNodeId) {
        let Some(node) = self.tree.node(id) else {
            return;
        };
        if self.policy.skips_partition(self.tree, id) {
            return;
        }
        if node.is_malformed() {
            tracing::warn!(node = id.0, "text with audio but no element; skipped");
            return;
        }

        let Some(name) = node.local_name() else {
            // Bare text, or a transparent grouping node.
            if let Some(text) = &node.text {
                self.doc.xml.append_text(parent, text);
            }
            for &child in &node.children {
                self.visit(child, parent);
            }
            return;
        };

        // The document root maps to <book> when it carries some other name.
        let name = if id == self.tree.root() && name != "book" {
            "book"
        } else {
            name
        };
        let element = self.doc.xml.append_element(parent, name);
        self.doc.elements.insert(id, element);
        self.copy_attributes(id, element);

        if let Some(text) = &node.text {
            self.doc.xml.append_text(element, text);
        }
        for &child in &node.children {
            self.visit(child, element);
        }
    }

    fn copy_attributes(&mut self, id: NodeId, element: XmlNodeId) {
        let Some(node) = self.tree.node(id) else {
            return;
        };
        let name = node.local_name().unwrap_or_default();
        let mut has_id = false;

        for attr in &node.attributes {
            let local = attr.name.local.as_str();
            if local == "id" {
                let new_id = self.ids.next(IdNamespace::Content);
                if !self.doc.id_map.insert(&attr.value, &new_id) {
                    tracing::warn!(id = %attr.value, "duplicate id; keeping first mapping");
                    self.doc.duplicate_ids.push(attr.value.clone());
                }
                self.doc.xml.set_attr(element, "id", new_id);
                has_id = true;
            } else if local == "smilref" {
                // Regenerated during synchronization.
            } else if classify::is_reference_attribute(name, local) {
                self.doc.xml.set_attr(element, local, attr.value.as_str());
                self.doc.references.push(ReferenceAttribute {
                    element,
                    name: local.to_string(),
                    raw: attr.value.clone(),
                });
            } else {
                self.doc
                    .xml
                    .set_attr(element, &attr.output_name(), attr.value.as_str());
            }
        }

        if !has_id && classify::needs_generated_id(name) && element != self.doc.xml.root() {
            let new_id = self.ids.next(IdNamespace::Content);
            self.doc.xml.set_attr(element, "id", new_id);
        }
    }
}

fn write_head(xml: &mut XmlDocument, metadata: &Metadata) {
    let root = xml.root();
    let head = xml.prepend_element(root, "head");
    let mut meta = |name: &str, content: &str| {
        let el = xml.append_element(head, "meta");
        xml.set_attr(el, "name", name);
        xml.set_attr(el, "content", content);
    };
    meta("dtb:uid", &metadata.identifier);
    meta("dc:Title", &metadata.title);
    for author in &metadata.authors {
        meta("dc:Creator", author);
    }
    meta("dc:Language", metadata.language_or_default());
    if let Some(publisher) = &metadata.publisher {
        meta("dc:Publisher", publisher);
    }
    if let Some(date) = &metadata.date {
        meta("dc:Date", date);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LevelPolicy;
    use crate::model::{AudioClip, ContentNode};

    fn build(tree: &Presentation) -> (ContentDocument, IdentifierAllocator) {
        let mut ids = IdentifierAllocator::new();
        let doc = ContentDocumentBuilder::new(tree, &LevelPolicy, &mut ids).build();
        (doc, ids)
    }

    #[test]
    fn test_ids_are_regenerated() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        let p = tree.append_element(level, "p");
        tree.set_attribute(p, "id", "para-1");
        tree.append_text(p, "Text");

        let (doc, _) = build(&tree);
        let new_id = doc.id_map.get("para-1").unwrap();
        assert_eq!(new_id, "dtb1");
        assert_eq!(doc.anchor_id(p), Some("dtb1"));
        // Bare levels get no generated id
        assert_eq!(doc.anchor_id(level), None);
    }

    #[test]
    fn test_missing_ids_are_generated() {
        let mut tree = Presentation::new("book");
        let bodymatter = tree.append_element(NodeId::ROOT, "bodymatter");
        let h1 = tree.append_element(bodymatter, "h1");
        tree.append_text(h1, "Title");

        let (doc, ids) = build(&tree);
        assert_eq!(doc.anchor_id(bodymatter), None);
        assert_eq!(doc.anchor_id(h1), Some("dtb1"));
        assert_eq!(ids.issued(IdNamespace::Content), 1);
    }

    #[test]
    fn test_duplicate_id_first_mapping_wins() {
        let mut tree = Presentation::new("book");
        let a = tree.append_element(NodeId::ROOT, "p");
        let b = tree.append_element(NodeId::ROOT, "p");
        tree.set_attribute(a, "id", "same");
        tree.set_attribute(b, "id", "same");

        let (doc, _) = build(&tree);
        assert_eq!(doc.id_map.get("same"), doc.anchor_id(a));
        assert_ne!(doc.anchor_id(a), doc.anchor_id(b));
        assert_eq!(doc.duplicate_ids, vec!["same".to_string()]);
        assert_eq!(doc.id_map.len(), 1);
    }

    #[test]
    fn test_reference_attributes_collected() {
        let mut tree = Presentation::new("book");
        let p = tree.append_element(NodeId::ROOT, "p");
        let noteref = tree.append_element(p, "noteref");
        tree.set_attribute(noteref, "idref", "#n1");
        let a = tree.append_element(p, "a");
        tree.set_attribute(a, "href", "https://example.com");

        let (doc, _) = build(&tree);
        assert_eq!(doc.references.len(), 2);
        assert_eq!(doc.references[0].name, "idref");
        assert_eq!(doc.references[0].raw, "#n1");
        assert_eq!(doc.references[1].name, "href");
    }

    #[test]
    fn test_malformed_node_skipped() {
        let mut tree = Presentation::new("book");
        let p = tree.append_element(NodeId::ROOT, "p");
        let mut bad = ContentNode::text("narrated");
        bad.audio = Some(AudioClip::new("a.mp3", 0, 100));
        let bad = tree.alloc_node(bad);
        tree.append_child(p, bad);
        tree.append_text(p, "plain");

        let (doc, _) = build(&tree);
        let xml = doc.xml.to_xml_string();
        assert!(xml.contains(">plain</p>"));
        assert!(!xml.contains("narrated"));
    }

    #[test]
    fn test_head_and_root() {
        let mut tree = Presentation::new("book");
        tree.metadata.title = "A & B".to_string();
        tree.append_element(NodeId::ROOT, "bodymatter");

        let (doc, _) = build(&tree);
        let xml = doc.xml.to_xml_string();
        assert!(xml.contains("<!DOCTYPE dtbook"));
        assert!(xml.contains("<dtbook xmlns=\"http://www.daisy.org/z3986/2005/dtbook/\""));
        assert!(xml.contains("<meta name=\"dc:Title\" content=\"A &amp; B\"/>"));
        let head_pos = xml.find("<head>").unwrap();
        let book_pos = xml.find("<book>").unwrap();
        assert!(head_pos < book_pos);
    }

    #[test]
    fn test_smilref_first_wins() {
        let mut tree = Presentation::new("book");
        let p = tree.append_element(NodeId::ROOT, "p");
        let (mut doc, _) = build(&tree);
        let el = doc.element_for(p).unwrap();
        assert!(doc.set_smilref(el, "dtb_0001.smil#tcp1"));
        assert!(!doc.set_smilref(el, "dtb_0001.smil#tcp2"));
        assert_eq!(doc.xml.attr(el, "smilref"), Some("dtb_0001.smil#tcp1"));
    }
}
