//! Second pass over the content document: rewrite id references.

use super::{IdentifierMap, ReferenceAttribute};
use crate::xml::XmlDocument;

/// Outcome of a resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub resolved: usize,
    /// Raw values that named no known id (left unchanged in the output).
    pub unresolved: Vec<String>,
}

/// Rewrites collected reference attributes through an [`IdentifierMap`].
pub struct ReferenceResolver<'a> {
    map: &'a IdentifierMap,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(map: &'a IdentifierMap) -> Self {
        Self { map }
    }

    /// Resolve a single raw reference value.
    ///
    /// The fragment after `#` (or the whole value when there is none) is
    /// looked up; external URLs are never rewritten.
    pub fn resolve_value(&self, raw: &str) -> Option<String> {
        let key = reference_key(raw)?;
        self.map.get(key).map(|new_id| format!("#{new_id}"))
    }

    /// Rewrite `references` in `xml`.
    ///
    /// Values are always computed from the raw source value, so running the
    /// pass again yields the same document.
    pub fn resolve_all(&self, xml: &mut XmlDocument, references: &[ReferenceAttribute]) -> ResolveReport {
        let mut report = ResolveReport::default();
        for reference in references {
            match self.resolve_value(&reference.raw) {
                Some(value) => {
                    xml.set_attr(reference.element, &reference.name, value);
                    report.resolved += 1;
                }
                None => {
                    if !is_external(reference.raw.trim()) {
                        tracing::warn!(
                            attribute = %reference.name,
                            value = %reference.raw,
                            "dangling reference left unresolved"
                        );
                        report.unresolved.push(reference.raw.clone());
                    }
                    xml.set_attr(reference.element, &reference.name, reference.raw.as_str());
                }
            }
        }
        report
    }
}

/// Id a reference value names: the fragment after the first `#`, or the
/// whole value when there is none. External URLs and empty fragments name
/// nothing.
pub fn reference_key(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    if is_external(raw) {
        return None;
    }
    let key = raw.split_once('#').map_or(raw, |(_, fragment)| fragment);
    (!key.is_empty()).then_some(key)
}

fn is_external(raw: &str) -> bool {
    raw.contains("://") || raw.starts_with("mailto:")
}
