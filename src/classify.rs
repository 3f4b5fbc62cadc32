//! Maps DTBook element names to their roles in synchronization and navigation.

use crate::model::{ContentNode, NodeId, Presentation};

/// How a node shapes the playback structure of a sync file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    /// A heading; the first one per partition feeds the navigation map.
    Heading,
    /// Content the reader may escape out of (lists, tables, notes, ...).
    Escapable,
    /// Content the reader may switch off through a custom test.
    Skippable(CustomTest),
}

/// Custom tests a playback device can toggle, with their DAISY `bookStruct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub enum CustomTest {
    PageNumber,
    NoteReference,
    AnnotationReference,
    LineNumber,
    OptionalSidebar,
    OptionalProducerNote,
}

impl CustomTest {
    /// Class name used for `customTest` ids and `class` attributes.
    pub fn class(self) -> &'static str {
        match self {
            CustomTest::PageNumber => "pagenum",
            CustomTest::NoteReference => "noteref",
            CustomTest::AnnotationReference => "annoref",
            CustomTest::LineNumber => "linenum",
            CustomTest::OptionalSidebar => "sidebar",
            CustomTest::OptionalProducerNote => "prodnote",
        }
    }

    /// `bookStruct` value declared in the navigation index.
    pub fn book_struct(self) -> &'static str {
        match self {
            CustomTest::PageNumber => "PAGE_NUMBER",
            CustomTest::NoteReference => "NOTE_REFERENCE",
            CustomTest::AnnotationReference => "ANNOTATION",
            CustomTest::LineNumber => "LINE_NUMBER",
            CustomTest::OptionalSidebar => "OPTIONAL_SIDEBAR",
            CustomTest::OptionalProducerNote => "OPTIONAL_PRODUCER_NOTE",
        }
    }
}

/// Classify a node as a special playback region.
pub fn region_of(node: &ContentNode) -> Option<Region> {
    let name = node.local_name()?;
    let optional = node.attribute("render") == Some("optional");
    match name {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "hd" | "levelhd" => Some(Region::Heading),

        "pagenum" => Some(Region::Skippable(CustomTest::PageNumber)),
        "noteref" => Some(Region::Skippable(CustomTest::NoteReference)),
        "annoref" => Some(Region::Skippable(CustomTest::AnnotationReference)),
        "linenum" => Some(Region::Skippable(CustomTest::LineNumber)),
        "sidebar" if optional => Some(Region::Skippable(CustomTest::OptionalSidebar)),
        "prodnote" if optional => Some(Region::Skippable(CustomTest::OptionalProducerNote)),

        "list" | "table" | "tr" | "note" | "annotation" | "sidebar" | "prodnote" => {
            Some(Region::Escapable)
        }

        _ => None,
    }
}

/// Sectioning levels (`level`, `level1` .. `level6`).
pub fn is_level(name: &str) -> bool {
    name == "level" || level_depth(name).is_some()
}

/// Depth encoded in a numbered level name.
pub fn level_depth(name: &str) -> Option<u8> {
    let depth: u8 = name.strip_prefix("level")?.parse().ok()?;
    (1..=6).contains(&depth).then_some(depth)
}

/// Whether a node is a heading element.
pub fn is_heading(node: &ContentNode) -> bool {
    region_of(node) == Some(Region::Heading)
}

/// Note and annotation references, whose targets can be expanded inline.
pub fn is_note_reference(name: &str) -> bool {
    matches!(name, "noteref" | "annoref")
}

pub fn is_page_number(name: &str) -> bool {
    name == "pagenum"
}

/// Elements that receive a generated id when the source has none.
///
/// Top-level containers and bare levels are left alone.
pub fn needs_generated_id(name: &str) -> bool {
    !matches!(
        name,
        "dtbook" | "head" | "book" | "frontmatter" | "bodymatter" | "rearmatter"
    ) && !is_level(name)
}

/// Attributes whose value is (or ends in a fragment naming) another element's id.
pub fn is_reference_attribute(element: &str, attribute: &str) -> bool {
    matches!(
        (element, attribute),
        ("noteref" | "annoref", "idref") | ("a", "href") | ("prodnote" | "caption", "imgref")
    )
}

/// Decides where the sync output is split into partitions.
pub trait PartitionPolicy {
    /// Whether `node` starts a new partition (and so a new sync file).
    fn triggers_partition(&self, tree: &Presentation, node: NodeId) -> bool;

    /// Whether `node` and its subtree are left out of the export altogether.
    fn skips_partition(&self, _tree: &Presentation, _node: NodeId) -> bool {
        false
    }
}

/// Default policy: every sectioning level starts a partition, nothing is skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelPolicy;

impl PartitionPolicy for LevelPolicy {
    fn triggers_partition(&self, tree: &Presentation, node: NodeId) -> bool {
        tree.node(node)
            .and_then(|n| n.local_name())
            .is_some_and(is_level)
    }
}
