//! Navigation index (NCX) construction.
//!
//! The index is filled during the synchronization walk: entries are opened
//! as [`PendingEntry`] values when their node is entered and become real
//! entries once the first alignment pair inside the node gives them a
//! [`SyncAnchor`]. Play order is assigned after the whole tree was walked.

mod page;

use std::collections::HashMap;
use std::fmt::Write;

use crate::classify::{self, CustomTest};
use crate::ids::{IdNamespace, IdentifierAllocator};
use crate::model::{AudioClip, Metadata, NodeId, Presentation};
use crate::smil::ClockValue;
use crate::util::{collapse_whitespace, encode_src, escape_xml};

pub use page::{PageKind, parse_roman, to_roman};

/// Label of a navigation entry: text plus optional narration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavLabel {
    pub text: String,
    pub audio: Option<AudioClip>,
}

/// A position in a sync file that a navigation entry points to.
#[derive(Debug, Clone, Copy)]
pub struct SyncAnchor<'a> {
    /// `file.smil#id` reference.
    pub src: &'a str,
    pub audio: Option<&'a AudioClip>,
}

/// A navigation entry waiting for its first alignment pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingEntry {
    /// The first heading of the partition rooted at `level`.
    Heading { level: NodeId, text: String },
    Page { kind: PageKind, text: String },
    /// An entry in the special-content list named `class`.
    ListItem { class: String, text: String },
    DocTitle { text: String },
}

/// Entry of the hierarchical navigation map.
#[derive(Debug, Clone)]
pub struct NavPoint {
    pub id: String,
    pub class: String,
    pub label: NavLabel,
    pub content: String,
    pub depth: usize,
    pub children: Vec<usize>,
    pub play_order: u32,
}

#[derive(Debug, Clone)]
pub struct PageTarget {
    pub id: String,
    pub kind: PageKind,
    pub value: Option<u32>,
    pub label: NavLabel,
    pub content: String,
    pub play_order: u32,
}

#[derive(Debug, Clone)]
pub struct NavTarget {
    pub id: String,
    pub label: NavLabel,
    pub content: String,
    pub play_order: u32,
}

/// A named special-content list (notes, sidebars, ...).
#[derive(Debug, Clone)]
pub struct NavList {
    pub class: String,
    pub label: String,
    pub targets: Vec<NavTarget>,
}

#[derive(Debug, Clone, Copy)]
enum EntryRef {
    Point(usize),
    Page(usize),
    Target(usize, usize),
}

/// Values for the NCX `<head>`.
#[derive(Debug, Clone)]
pub struct NcxHead<'a> {
    pub metadata: &'a Metadata,
    pub custom_tests: &'a [CustomTest],
    pub generator: &'a str,
}

/// Accumulates the navigation index during synchronization.
#[derive(Debug, Default)]
pub struct NavigationBuilder {
    points: Vec<NavPoint>,
    top_level: Vec<usize>,
    level_points: HashMap<NodeId, usize>,
    pages: Vec<PageTarget>,
    lists: Vec<NavList>,
    doc_title: Option<NavLabel>,
    /// Entries in the order they received their anchor.
    registration: Vec<EntryRef>,
    /// Maximum number of level ancestors examined for a heading's parent.
    heading_search_hops: Option<usize>,
}

impl NavigationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the upward search for a heading's parent entry.
    ///
    /// When the bound is exceeded the heading is attached at the top level.
    pub fn with_heading_search_hops(mut self, hops: Option<usize>) -> Self {
        self.heading_search_hops = hops;
        self
    }

    /// Turn a pending entry into a real one anchored at `anchor`.
    pub fn resolve(
        &mut self,
        entry: PendingEntry,
        anchor: SyncAnchor<'_>,
        tree: &Presentation,
        ids: &mut IdentifierAllocator,
    ) {
        let label = |text: String| NavLabel {
            text: collapse_whitespace(&text),
            audio: anchor.audio.cloned(),
        };
        match entry {
            PendingEntry::Heading { level, text } => {
                if let Some(&existing) = self.level_points.get(&level) {
                    let point = &mut self.points[existing];
                    if point.label.audio.is_none() {
                        point.label.audio = anchor.audio.cloned();
                    }
                    return;
                }
                let parent = self.find_parent(tree, level);
                let depth = parent.map_or(1, |p| self.points[p].depth + 1);
                let index = self.points.len();
                self.points.push(NavPoint {
                    id: ids.next(IdNamespace::Nav),
                    class: format!("level{depth}"),
                    label: label(text),
                    content: anchor.src.to_string(),
                    depth,
                    children: Vec::new(),
                    play_order: 0,
                });
                match parent {
                    Some(p) => self.points[p].children.push(index),
                    None => self.top_level.push(index),
                }
                self.level_points.insert(level, index);
                self.registration.push(EntryRef::Point(index));
            }
            PendingEntry::Page { kind, text } => {
                let value = kind.parse_value(&text);
                if value.is_none() && kind != PageKind::Special {
                    tracing::warn!(page = %text.trim(), kind = kind.as_str(), "unparseable page number");
                }
                let index = self.pages.len();
                self.pages.push(PageTarget {
                    id: ids.next(IdNamespace::Nav),
                    kind,
                    value,
                    label: label(text),
                    content: anchor.src.to_string(),
                    play_order: 0,
                });
                self.registration.push(EntryRef::Page(index));
            }
            PendingEntry::ListItem { class, text } => {
                let list = match self.lists.iter().position(|l| l.class == class) {
                    Some(list) => list,
                    None => {
                        self.lists.push(NavList {
                            label: class.clone(),
                            class,
                            targets: Vec::new(),
                        });
                        self.lists.len() - 1
                    }
                };
                let id = ids.next(IdNamespace::Nav);
                let targets = &mut self.lists[list].targets;
                targets.push(NavTarget {
                    id,
                    label: label(text),
                    content: anchor.src.to_string(),
                    play_order: 0,
                });
                self.registration
                    .push(EntryRef::Target(list, targets.len() - 1));
            }
            PendingEntry::DocTitle { text } => {
                if self.doc_title.is_none() {
                    self.doc_title = Some(label(text));
                }
            }
        }
    }

    /// Nearest level ancestor of `level` that already has an entry.
    fn find_parent(&self, tree: &Presentation, level: NodeId) -> Option<usize> {
        let mut hops = 0;
        for ancestor in tree.ancestors(level) {
            let is_level = tree
                .node(ancestor)
                .and_then(|n| n.local_name())
                .is_some_and(classify::is_level);
            if !is_level {
                continue;
            }
            if let Some(&point) = self.level_points.get(&ancestor) {
                return Some(point);
            }
            hops += 1;
            if let Some(limit) = self.heading_search_hops
                && hops >= limit
            {
                tracing::warn!(limit, "heading parent search exhausted; attaching at top level");
                return None;
            }
        }
        None
    }

    /// Assign play order in first-seen order. Entries sharing an anchor share
    /// an ordinal.
    pub fn assign_play_order(&mut self) {
        let mut by_anchor: HashMap<String, u32> = HashMap::new();
        let mut next = 1;
        for entry in self.registration.clone() {
            let (content, slot) = match entry {
                EntryRef::Point(i) => {
                    let p = &mut self.points[i];
                    (&p.content, &mut p.play_order)
                }
                EntryRef::Page(i) => {
                    let p = &mut self.pages[i];
                    (&p.content, &mut p.play_order)
                }
                EntryRef::Target(l, i) => {
                    let t = &mut self.lists[l].targets[i];
                    (&t.content, &mut t.play_order)
                }
            };
            *slot = *by_anchor.entry(content.clone()).or_insert_with(|| {
                let order = next;
                next += 1;
                order
            });
        }
    }

    pub fn points(&self) -> &[NavPoint] {
        &self.points
    }

    pub fn pages(&self) -> &[PageTarget] {
        &self.pages
    }

    pub fn lists(&self) -> &[NavList] {
        &self.lists
    }

    pub fn doc_title(&self) -> Option<&NavLabel> {
        self.doc_title.as_ref()
    }

    /// Depth of the deepest navigation point.
    pub fn max_depth(&self) -> usize {
        self.points.iter().map(|p| p.depth).max().unwrap_or(0)
    }

    pub fn total_page_count(&self) -> usize {
        self.pages.len()
    }

    /// Largest numeric value among normal pages.
    pub fn max_page_number(&self) -> u32 {
        self.pages
            .iter()
            .filter(|p| p.kind == PageKind::Normal)
            .filter_map(|p| p.value)
            .max()
            .unwrap_or(0)
    }

    /// Serialize the index as an NCX document.
    pub fn to_ncx(&self, head: &NcxHead<'_>) -> String {
        let metadata = head.metadata;
        let mut ncx = String::new();

        ncx.push_str(
            r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE ncx PUBLIC "-//NISO//DTD ncx 2005-1//EN" "http://www.daisy.org/z3986/2005/ncx-2005-1.dtd">
"#,
        );
        writeln!(
            ncx,
            "<ncx xmlns=\"http://www.daisy.org/z3986/2005/ncx/\" version=\"2005-1\" xml:lang=\"{}\">",
            escape_xml(metadata.language_or_default())
        )
        .unwrap();

        ncx.push_str("  <head>\n");
        for test in head.custom_tests {
            writeln!(
                ncx,
                "    <smilCustomTest id=\"{0}\" defaultState=\"false\" override=\"visible\" bookStruct=\"{1}\"/>",
                test.class(),
                test.book_struct()
            )
            .unwrap();
        }
        let meta = |ncx: &mut String, name: &str, content: &str| {
            writeln!(
                ncx,
                "    <meta name=\"{}\" content=\"{}\"/>",
                name,
                escape_xml(content)
            )
            .unwrap();
        };
        meta(&mut ncx, "dtb:uid", &metadata.identifier);
        meta(&mut ncx, "dtb:generator", head.generator);
        meta(&mut ncx, "dtb:depth", &self.max_depth().to_string());
        meta(
            &mut ncx,
            "dtb:totalPageCount",
            &self.total_page_count().to_string(),
        );
        meta(
            &mut ncx,
            "dtb:maxPageNumber",
            &self.max_page_number().to_string(),
        );
        ncx.push_str("  </head>\n");

        let title = self.doc_title.clone().unwrap_or_else(|| NavLabel {
            text: metadata.title.clone(),
            audio: None,
        });
        ncx.push_str("  <docTitle>\n");
        write_label_body(&mut ncx, &title, 2);
        ncx.push_str("  </docTitle>\n");
        for author in &metadata.authors {
            writeln!(
                ncx,
                "  <docAuthor>\n    <text>{}</text>\n  </docAuthor>",
                escape_xml(author)
            )
            .unwrap();
        }

        ncx.push_str("  <navMap>\n");
        for &index in &self.top_level {
            self.write_nav_point(&mut ncx, index, 2);
        }
        ncx.push_str("  </navMap>\n");

        if !self.pages.is_empty() {
            ncx.push_str("  <pageList>\n");
            for page in &self.pages {
                write!(
                    ncx,
                    "    <pageTarget id=\"{}\" type=\"{}\"",
                    page.id,
                    page.kind.as_str()
                )
                .unwrap();
                if let Some(value) = page.value {
                    write!(ncx, " value=\"{}\"", value).unwrap();
                }
                writeln!(ncx, " playOrder=\"{}\">", page.play_order).unwrap();
                write_label(&mut ncx, &page.label, 3);
                write_content(&mut ncx, &page.content, 3);
                ncx.push_str("    </pageTarget>\n");
            }
            ncx.push_str("  </pageList>\n");
        }

        for list in &self.lists {
            writeln!(ncx, "  <navList class=\"{}\">", escape_xml(&list.class)).unwrap();
            write_label(
                &mut ncx,
                &NavLabel {
                    text: list.label.clone(),
                    audio: None,
                },
                2,
            );
            for target in &list.targets {
                writeln!(
                    ncx,
                    "    <navTarget id=\"{}\" playOrder=\"{}\">",
                    target.id, target.play_order
                )
                .unwrap();
                write_label(&mut ncx, &target.label, 3);
                write_content(&mut ncx, &target.content, 3);
                ncx.push_str("    </navTarget>\n");
            }
            ncx.push_str("  </navList>\n");
        }

        ncx.push_str("</ncx>\n");
        ncx
    }

    /// Recursively write navPoint elements.
    fn write_nav_point(&self, ncx: &mut String, index: usize, indent: usize) {
        let point = &self.points[index];
        let indent_str = "  ".repeat(indent);
        writeln!(
            ncx,
            "{}<navPoint id=\"{}\" class=\"{}\" playOrder=\"{}\">",
            indent_str, point.id, point.class, point.play_order
        )
        .unwrap();
        write_label(ncx, &point.label, indent + 1);
        write_content(ncx, &point.content, indent + 1);
        for &child in &point.children {
            self.write_nav_point(ncx, child, indent + 1);
        }
        writeln!(ncx, "{}</navPoint>", indent_str).unwrap();
    }
}

fn write_label(ncx: &mut String, label: &NavLabel, indent: usize) {
    let indent_str = "  ".repeat(indent);
    writeln!(ncx, "{}<navLabel>", indent_str).unwrap();
    write_label_body(ncx, label, indent + 1);
    writeln!(ncx, "{}</navLabel>", indent_str).unwrap();
}

fn write_label_body(ncx: &mut String, label: &NavLabel, indent: usize) {
    let indent_str = "  ".repeat(indent);
    writeln!(ncx, "{}<text>{}</text>", indent_str, escape_xml(&label.text)).unwrap();
    if let Some(audio) = &label.audio {
        writeln!(
            ncx,
            "{}<audio src=\"{}\" clipBegin=\"{}\" clipEnd=\"{}\"/>",
            indent_str,
            escape_xml(&encode_src(&audio.src)),
            ClockValue(audio.clip_begin),
            ClockValue(audio.clip_end)
        )
        .unwrap();
    }
}

fn write_content(ncx: &mut String, src: &str, indent: usize) {
    writeln!(
        ncx,
        "{}<content src=\"{}\"/>",
        "  ".repeat(indent),
        escape_xml(src)
    )
    .unwrap();
}
