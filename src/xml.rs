//! Mutable output XML tree.
//!
//! The content document and the sync files are built as trees rather than
//! streamed, because attributes are back-filled after their element was
//! emitted (`smilref`, escapable `end`, resolved references) and empty
//! sequences are pruned when a region closes.

use std::fmt::Write;
use std::fs;
use std::io;
use std::path::Path;

use quick_xml::escape::escape;

/// Unique identifier for a node within an [`XmlDocument`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XmlNodeId(pub u32);

#[derive(Debug, Clone)]
enum XmlData {
    Element {
        name: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct XmlNode {
    data: XmlData,
    parent: Option<XmlNodeId>,
    children: Vec<XmlNodeId>,
}

/// Arena-backed XML document with a fixed root element.
#[derive(Debug, Clone)]
pub struct XmlDocument {
    nodes: Vec<XmlNode>,
    /// Declarations written before the root (XML declaration, doctype).
    prolog: String,
}

impl XmlDocument {
    /// Create a document whose root element is `root_name`.
    pub fn new(root_name: &str, doctype: Option<&str>) -> Self {
        let mut prolog = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
        if let Some(doctype) = doctype {
            prolog.push_str(doctype);
            prolog.push('\n');
        }
        Self {
            nodes: vec![XmlNode {
                data: XmlData::Element {
                    name: root_name.to_string(),
                    attrs: Vec::new(),
                },
                parent: None,
                children: Vec::new(),
            }],
            prolog,
        }
    }

    pub fn root(&self) -> XmlNodeId {
        XmlNodeId(0)
    }

    fn alloc(&mut self, data: XmlData) -> XmlNodeId {
        let id = XmlNodeId(self.nodes.len() as u32);
        self.nodes.push(XmlNode {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn get(&self, id: XmlNodeId) -> Option<&XmlNode> {
        self.nodes.get(id.0 as usize)
    }

    fn get_mut(&mut self, id: XmlNodeId) -> Option<&mut XmlNode> {
        self.nodes.get_mut(id.0 as usize)
    }

    fn append(&mut self, parent: XmlNodeId, child: XmlNodeId) {
        if let Some(node) = self.get_mut(child) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Create an element and append it to `parent`.
    pub fn append_element(&mut self, parent: XmlNodeId, name: &str) -> XmlNodeId {
        let id = self.alloc(XmlData::Element {
            name: name.to_string(),
            attrs: Vec::new(),
        });
        self.append(parent, id);
        id
    }

    /// Create a text node and append it to `parent`.
    pub fn append_text(&mut self, parent: XmlNodeId, text: &str) -> XmlNodeId {
        let id = self.alloc(XmlData::Text(text.to_string()));
        self.append(parent, id);
        id
    }

    /// Remove a node (and its subtree) from its parent.
    pub fn detach(&mut self, id: XmlNodeId) {
        let Some(parent) = self.get(id).and_then(|n| n.parent) else {
            return;
        };
        if let Some(node) = self.get_mut(parent) {
            node.children.retain(|&c| c != id);
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = None;
        }
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attr(&mut self, id: XmlNodeId, name: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(XmlNode {
            data: XmlData::Element { attrs, .. },
            ..
        }) = self.get_mut(id)
        {
            match attrs.iter_mut().find(|(k, _)| k == name) {
                Some(slot) => slot.1 = value,
                None => attrs.push((name.to_string(), value)),
            }
        }
    }

    pub fn attr(&self, id: XmlNodeId, name: &str) -> Option<&str> {
        match self.get(id).map(|n| &n.data) {
            Some(XmlData::Element { attrs, .. }) => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Element name, or `None` for text nodes.
    pub fn name(&self, id: XmlNodeId) -> Option<&str> {
        match self.get(id).map(|n| &n.data) {
            Some(XmlData::Element { name, .. }) => Some(name),
            _ => None,
        }
    }

    pub fn children(&self, id: XmlNodeId) -> &[XmlNodeId] {
        self.get(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Create an element and insert it as the first child of `parent`.
    pub fn prepend_element(&mut self, parent: XmlNodeId, name: &str) -> XmlNodeId {
        let id = self.alloc(XmlData::Element {
            name: name.to_string(),
            attrs: Vec::new(),
        });
        if let Some(node) = self.get_mut(id) {
            node.parent = Some(parent);
        }
        if let Some(node) = self.get_mut(parent) {
            node.children.insert(0, id);
        }
        id
    }

    /// Serialize the whole document.
    ///
    /// Elements holding only elements are indented one level per depth;
    /// elements with text content are written inline so that no whitespace is
    /// added to mixed content.
    pub fn to_xml_string(&self) -> String {
        let mut out = self.prolog.clone();
        self.write_node(self.root(), 0, true, &mut out);
        out.push('\n');
        out
    }

    /// Serialize and write to `path`.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.to_xml_string())
    }

    fn write_node(&self, id: XmlNodeId, depth: usize, pretty: bool, out: &mut String) {
        let Some(node) = self.get(id) else {
            return;
        };
        match &node.data {
            XmlData::Text(text) => out.push_str(&escape(text.as_str())),
            XmlData::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for (key, value) in attrs {
                    write!(out, " {}=\"{}\"", key, escape(value.as_str())).unwrap();
                }
                if node.children.is_empty() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');

                let element_only = pretty
                    && node
                        .children
                        .iter()
                        .all(|&c| self.name(c).is_some());
                for &child in &node.children {
                    if element_only {
                        out.push('\n');
                        out.push_str(&"  ".repeat(depth + 1));
                    }
                    self.write_node(child, depth + 1, element_only, out);
                }
                if element_only {
                    out.push('\n');
                    out.push_str(&"  ".repeat(depth));
                }
                write!(out, "</{}>", name).unwrap();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_nested() {
        let mut doc = XmlDocument::new("root", None);
        let root = doc.root();
        let a = doc.append_element(root, "a");
        doc.set_attr(a, "id", "x&y");
        let b = doc.append_element(root, "b");
        doc.append_text(b, "1 < 2");

        let xml = doc.to_xml_string();
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<root>"));
        assert!(xml.contains("\n  <a id=\"x&amp;y\"/>"));
        assert!(xml.contains("\n  <b>1 &lt; 2</b>"));
        assert!(xml.ends_with("</root>\n"));
    }

    #[test]
    fn test_mixed_content_is_inline() {
        let mut doc = XmlDocument::new("p", None);
        let root = doc.root();
        doc.append_text(root, "Hello ");
        let em = doc.append_element(root, "em");
        doc.append_text(em, "world");
        assert!(doc.to_xml_string().contains("<p>Hello <em>world</em></p>"));
    }

    #[test]
    fn test_detach_and_attrs() {
        let mut doc = XmlDocument::new("seq", None);
        let root = doc.root();
        let par = doc.append_element(root, "par");
        doc.set_attr(par, "id", "a");
        doc.set_attr(par, "id", "b");
        assert_eq!(doc.attr(par, "id"), Some("b"));
        doc.detach(par);
        assert!(doc.children(root).is_empty());
        assert_eq!(doc.to_xml_string().trim_end(), "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<seq/>");
    }

    #[test]
    fn test_prepend() {
        let mut doc = XmlDocument::new("dtbook", None);
        let root = doc.root();
        doc.append_element(root, "book");
        let head = doc.prepend_element(root, "head");
        assert_eq!(doc.children(root)[0], head);
        assert_eq!(doc.name(head), Some("head"));
    }
}
