//! Synchronization (SMIL) partitioning.
//!
//! The presentation is cut into partitions: the document root plus every
//! node the [`PartitionPolicy`] triggers on. Each partition is walked on its
//! own and becomes one sync file. Walking a partition does three things at
//! once: it emits alignment pairs (a text anchor into the content document
//! plus an optional audio clip), it nests those pairs in sequences that
//! mirror the special regions of the source, and it feeds the navigation
//! index with the first pair that follows each navigable node.

mod clock;
mod frames;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::ControlFlow;
use std::path::Path;

use crate::cancel::CancellationToken;
use crate::classify::{self, CustomTest, PartitionPolicy, Region};
use crate::dtbook::{ContentDocument, reference_key};
use crate::error::Result;
use crate::export::ExportEvent;
use crate::ids::{IdNamespace, IdentifierAllocator};
use crate::model::{AudioClip, NodeId, Presentation};
use crate::ncx::{NavigationBuilder, PageKind, PendingEntry, SyncAnchor};
use crate::util::{encode_src, is_significant};
use crate::xml::{XmlDocument, XmlNodeId};

pub use clock::ClockValue;
use frames::{ClosedFrame, Frame, RegionStack};

const SMIL_DOCTYPE: &str = r#"<!DOCTYPE smil PUBLIC "-//NISO//DTD dtbsmil 2005-2//EN" "http://www.daisy.org/z3986/2005/dtbsmil-2005-2.dtd">"#;
const SMIL_NS: &str = "http://www.w3.org/2001/SMIL20/";

/// Settings for one partitioning run.
#[derive(Debug, Clone)]
pub struct SyncOptions<'a> {
    /// Play note and annotation bodies where they are referenced.
    pub expand_references: bool,
    /// Elements collected into special-content navigation lists.
    pub nav_list_elements: &'a [String],
    /// Stem of sync file names; `dtb_` gives `dtb_0001.smil`.
    pub file_prefix: &'a str,
    pub uid: &'a str,
    pub generator: &'a str,
}

/// A written sync file.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct SyncFile {
    pub file_name: String,
    /// Source node the partition was rooted at.
    #[cfg_attr(feature = "cli", serde(skip))]
    pub root: NodeId,
    pub pairs: usize,
    /// Sum of the clip durations in milliseconds.
    pub duration: u64,
    /// Duration of all earlier sync files.
    pub elapsed_before: u64,
    pub custom_tests: Vec<CustomTest>,
}

/// Result of a complete partitioning run.
#[derive(Debug, Clone, Default)]
pub struct SyncOutput {
    pub files: Vec<SyncFile>,
    pub total_duration: u64,
    pub custom_tests: BTreeSet<CustomTest>,
}

/// State of the partition being walked.
struct Partition {
    root: NodeId,
    file_name: String,
    smil: XmlDocument,
    head: XmlNodeId,
    body: XmlNodeId,
    frames: RegionStack,
    pairs: usize,
    duration: u64,
    custom_tests: BTreeSet<CustomTest>,
    /// Navigation entries waiting for the next pair, with the node that opened them.
    pending: Vec<(NodeId, PendingEntry)>,
    heading_indexed: bool,
    /// Number of audio-bearing nodes enclosing the current node.
    audio_depth: usize,
}

/// Splits a presentation into sync files and fills the navigation index.
pub struct SyncPartitioner<'a> {
    tree: &'a Presentation,
    doc: &'a mut ContentDocument,
    ids: &'a mut IdentifierAllocator,
    nav: &'a mut NavigationBuilder,
    options: SyncOptions<'a>,
    roots: Vec<NodeId>,
    is_root: HashSet<NodeId>,
    excluded: Vec<bool>,
    coverage: Vec<bool>,
    /// Reference node -> node its reference names.
    targets: HashMap<NodeId, NodeId>,
    /// Nodes played at their reference instead of in document order.
    expansion_targets: HashSet<NodeId>,
    expanded: HashSet<NodeId>,
    expansion_chain: Vec<NodeId>,
}

impl<'a> SyncPartitioner<'a> {
    pub fn new<P: PartitionPolicy + ?Sized>(
        tree: &'a Presentation,
        policy: &P,
        doc: &'a mut ContentDocument,
        ids: &'a mut IdentifierAllocator,
        nav: &'a mut NavigationBuilder,
        options: SyncOptions<'a>,
    ) -> Self {
        let excluded = excluded_nodes(tree, policy);
        let mut roots = vec![tree.root()];
        for id in tree.iter_dfs() {
            if id != tree.root()
                && !excluded[id.index()]
                && policy.triggers_partition(tree, id)
            {
                roots.push(id);
            }
        }
        let is_root: HashSet<NodeId> = roots.iter().copied().collect();

        let mut targets = HashMap::new();
        let mut candidates = Vec::new();
        if options.expand_references {
            let index = tree.id_index();
            for id in tree.iter_dfs() {
                let Some(node) = tree.node(id) else { continue };
                if excluded[id.index()] || !node.local_name().is_some_and(classify::is_note_reference) {
                    continue;
                }
                let Some(raw) = node.attribute("idref") else { continue };
                match reference_key(raw).and_then(|key| index.get(key)) {
                    Some(&target) => {
                        targets.insert(id, target);
                        let expandable = target != tree.root()
                            && !is_root.contains(&target)
                            && !excluded[target.index()]
                            && !tree.is_ancestor(target, id);
                        if expandable {
                            candidates.push((id, target));
                        }
                    }
                    None => tracing::warn!(idref = %raw, "note reference target not found"),
                }
            }
        }
        let walked: HashSet<NodeId> = roots
            .iter()
            .copied()
            .filter(|&root| owns_significant_text(tree, &excluded, &is_root, root))
            .collect();
        let expansion_targets = plan_expansions(tree, &candidates, |reference| {
            walked.contains(&partition_of(tree, &is_root, reference))
        });

        Self {
            tree,
            doc,
            ids,
            nav,
            options,
            roots,
            is_root,
            excluded,
            coverage: tree.audio_coverage(),
            targets,
            expansion_targets,
            expanded: HashSet::new(),
            expansion_chain: Vec::new(),
        }
    }

    /// Walk every partition and write its sync file into `out_dir`.
    ///
    /// Returns `Break` when `cancel` fired; files written up to that point
    /// stay on disk and the partition in progress is dropped.
    pub fn run(
        mut self,
        out_dir: &Path,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(&ExportEvent),
    ) -> Result<ControlFlow<(), SyncOutput>> {
        let mut output = SyncOutput::default();
        let roots = self.roots.clone();

        for root in roots {
            if cancel.is_cancelled() {
                return Ok(ControlFlow::Break(()));
            }
            if !owns_significant_text(self.tree, &self.excluded, &self.is_root, root) {
                tracing::debug!(root = root.0, "partition has no significant text; skipped");
                progress(&ExportEvent::PartitionSkipped { root });
                continue;
            }

            let file_name = format!(
                "{}{:04}.smil",
                self.options.file_prefix,
                output.files.len() + 1
            );
            let mut part = self.open_partition(root, file_name);
            progress(&ExportEvent::PartitionStarted {
                index: output.files.len(),
                file: part.file_name.clone(),
            });
            if self.visit(&mut part, root, false, cancel).is_break() {
                tracing::info!(file = %part.file_name, "cancelled; partition discarded");
                return Ok(ControlFlow::Break(()));
            }

            if part.pairs == 0 {
                tracing::debug!(root = root.0, "partition produced no pairs; skipped");
                progress(&ExportEvent::PartitionSkipped { root });
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(ControlFlow::Break(()));
            }

            let file = self.finish_partition(part, output.total_duration, out_dir)?;
            tracing::debug!(
                file = %file.file_name,
                pairs = file.pairs,
                duration = file.duration,
                "sync file written"
            );
            output.total_duration += file.duration;
            output.custom_tests.extend(file.custom_tests.iter().copied());
            progress(&ExportEvent::PartitionWritten {
                index: output.files.len(),
                file: file.file_name.clone(),
            });
            output.files.push(file);
        }

        Ok(ControlFlow::Continue(output))
    }

    fn open_partition(&mut self, root: NodeId, file_name: String) -> Partition {
        let mut smil = XmlDocument::new("smil", Some(SMIL_DOCTYPE));
        let smil_root = smil.root();
        smil.set_attr(smil_root, "xmlns", SMIL_NS);
        let head = smil.append_element(smil_root, "head");
        let body_el = smil.append_element(smil_root, "body");
        let body = smil.append_element(body_el, "seq");
        smil.set_attr(body, "id", self.ids.next(IdNamespace::Sync));

        Partition {
            root,
            file_name,
            smil,
            head,
            body,
            frames: RegionStack::new(),
            pairs: 0,
            duration: 0,
            custom_tests: BTreeSet::new(),
            pending: Vec::new(),
            heading_indexed: false,
            audio_depth: 0,
        }
    }

    fn visit(
        &mut self,
        part: &mut Partition,
        id: NodeId,
        expanding: bool,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        if cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        if self.excluded[id.index()] || (id != part.root && self.is_root.contains(&id)) {
            return ControlFlow::Continue(());
        }
        if !expanding && self.expansion_targets.contains(&id) {
            return ControlFlow::Continue(());
        }
        let tree = self.tree;
        let Some(node) = tree.node(id) else {
            return ControlFlow::Continue(());
        };
        if node.is_malformed() {
            return ControlFlow::Continue(());
        }

        let name = node.local_name();
        let region = classify::region_of(node);
        if let Some(name) = name {
            self.open_nav_entries(part, id, name);
        }
        let pushed = match region {
            Some(region) => {
                self.push_frame(part, id, region);
                true
            }
            None => false,
        };

        if let Some(clip) = &node.audio {
            self.emit_pair(part, id, Some(clip));
            part.audio_depth += 1;
        } else if name.is_some()
            && !part.frames.is_empty()
            && part.audio_depth == 0
            && !self.coverage[id.index()]
            && is_significant(&tree.direct_text(id))
        {
            self.emit_pair(part, id, None);
        }

        for &child in &node.children {
            self.visit(part, child, false, cancel)?;
        }

        if let Some(&target) = self.targets.get(&id) {
            self.expand(part, id, target, cancel)?;
        }

        if node.audio.is_some() {
            part.audio_depth -= 1;
        }
        if pushed && let Some(closed) = part.frames.pop(&mut part.smil) {
            self.close_frame(part, closed);
        }
        part.pending.retain(|(owner, entry)| {
            if *owner == id {
                tracing::debug!(?entry, "navigation entry without narration dropped");
            }
            *owner != id
        });
        ControlFlow::Continue(())
    }

    /// Play a note or annotation body inside the reference's region.
    fn expand(
        &mut self,
        part: &mut Partition,
        reference: NodeId,
        target: NodeId,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        if !self.expansion_targets.contains(&target) {
            return ControlFlow::Continue(());
        }
        if self.expansion_chain.contains(&target) {
            tracing::warn!(reference = reference.0, target = target.0, "reference cycle; not expanded");
            return ControlFlow::Continue(());
        }
        if !self.expanded.insert(target) {
            tracing::debug!(
                reference = reference.0,
                target = target.0,
                "target already played at an earlier reference"
            );
            return ControlFlow::Continue(());
        }

        self.expansion_chain.push(target);
        let audio_depth = std::mem::take(&mut part.audio_depth);
        let flow = self.visit(part, target, true, cancel);
        part.audio_depth = audio_depth;
        self.expansion_chain.pop();
        flow
    }

    fn open_nav_entries(&self, part: &mut Partition, id: NodeId, name: &str) {
        let Some(node) = self.tree.node(id) else {
            return;
        };
        let text = || self.tree.flattened_text(id);

        if classify::is_heading(node)
            && self.expansion_chain.is_empty()
            && !part.heading_indexed
            && !part
                .pending
                .iter()
                .any(|(_, e)| matches!(e, PendingEntry::Heading { .. }))
        {
            part.pending.push((
                id,
                PendingEntry::Heading {
                    level: part.root,
                    text: text(),
                },
            ));
        }
        if name == "doctitle" {
            part.pending.push((id, PendingEntry::DocTitle { text: text() }));
        }
        if classify::is_page_number(name) {
            let kind = PageKind::from_attribute(node.attribute("page"));
            part.pending.push((id, PendingEntry::Page { kind, text: text() }));
        }
        let listed = self.options.nav_list_elements.iter().any(|e| e == name);
        if listed || node.description.is_some() {
            let text = node.description.clone().unwrap_or_else(text);
            part.pending.push((
                id,
                PendingEntry::ListItem {
                    class: name.to_string(),
                    text,
                },
            ));
        }
    }

    fn push_frame(&mut self, part: &mut Partition, id: NodeId, region: Region) {
        let parent = part.frames.container().unwrap_or(part.body);
        let seq = part.smil.append_element(parent, "seq");
        let seq_id = self.ids.next(IdNamespace::Sync);
        part.smil.set_attr(seq, "id", seq_id.as_str());
        if let Some(name) = self.tree.node(id).and_then(|n| n.local_name()) {
            part.smil.set_attr(seq, "class", name);
        }
        if let Region::Skippable(test) = region {
            part.smil.set_attr(seq, "customTest", test.class());
        }
        part.frames.push(Frame::new(id, region, seq, seq_id));
    }

    fn close_frame(&mut self, part: &mut Partition, closed: ClosedFrame) {
        let Some(seq_id) = closed.seq_id else {
            return;
        };
        if let Some(test) = closed.custom_test {
            part.custom_tests.insert(test);
        }
        if let Some(element) = self.doc.element_for(closed.node) {
            self.doc
                .set_smilref(element, &format!("{}#{}", part.file_name, seq_id));
        }
    }

    fn emit_pair(&mut self, part: &mut Partition, id: NodeId, clip: Option<&AudioClip>) {
        let Some(anchor) = self.anchor_for(id) else {
            tracing::warn!(node = id.0, "no content element to anchor narration; skipped");
            return;
        };
        let container = part.frames.container().unwrap_or(part.body);
        let par = part.smil.append_element(container, "par");
        let par_id = self.ids.next(IdNamespace::Sync);
        part.smil.set_attr(par, "id", par_id.as_str());
        if let Some(name) = self.tree.node(id).and_then(|n| n.local_name()) {
            part.smil.set_attr(par, "class", name);
        }
        let text = part.smil.append_element(par, "text");
        part.smil
            .set_attr(text, "src", format!("{}#{}", self.doc.file_name, anchor.1));

        if let Some(clip) = clip {
            let audio = part.smil.append_element(par, "audio");
            part.smil.set_attr(audio, "src", encode_src(&clip.src));
            part.smil
                .set_attr(audio, "clipBegin", ClockValue(clip.clip_begin).to_string());
            part.smil
                .set_attr(audio, "clipEnd", ClockValue(clip.clip_end).to_string());
            part.duration += clip.duration();
        }

        let src = format!("{}#{}", part.file_name, par_id);
        self.doc.set_smilref(anchor.0, &src);
        part.frames.record_pair(&par_id);
        part.pairs += 1;

        let sync_anchor = SyncAnchor {
            src: &src,
            audio: clip,
        };
        for (_, entry) in std::mem::take(&mut part.pending) {
            if matches!(entry, PendingEntry::Heading { .. }) {
                part.heading_indexed = true;
            }
            self.nav.resolve(entry, sync_anchor, self.tree, self.ids);
        }
    }

    /// Content element and id a pair for `id` points at. Elements without an
    /// id get one generated.
    fn anchor_for(&mut self, id: NodeId) -> Option<(XmlNodeId, String)> {
        let element = self.doc.element_for(id)?;
        if let Some(existing) = self.doc.xml.attr(element, "id") {
            return Some((element, existing.to_string()));
        }
        let new_id = self.ids.next(IdNamespace::Content);
        self.doc.xml.set_attr(element, "id", new_id.as_str());
        Some((element, new_id))
    }

    fn finish_partition(&mut self, part: Partition, elapsed: u64, out_dir: &Path) -> Result<SyncFile> {
        let Partition {
            root,
            file_name,
            mut smil,
            head,
            body,
            pairs,
            duration,
            custom_tests,
            ..
        } = part;

        let mut meta = |name: &str, content: &str| {
            let el = smil.append_element(head, "meta");
            smil.set_attr(el, "name", name);
            smil.set_attr(el, "content", content);
        };
        meta("dtb:uid", self.options.uid);
        meta("dtb:generator", self.options.generator);
        meta("dtb:totalElapsedTime", &ClockValue(elapsed).to_string());
        if !custom_tests.is_empty() {
            let attributes = smil.append_element(head, "customAttributes");
            for test in &custom_tests {
                let el = smil.append_element(attributes, "customTest");
                smil.set_attr(el, "id", test.class());
                smil.set_attr(el, "defaultState", "false");
                smil.set_attr(el, "override", "visible");
            }
        }
        smil.set_attr(body, "dur", ClockValue(duration).to_string());
        smil.set_attr(body, "fill", "remove");

        smil.write_to(&out_dir.join(&file_name))?;
        Ok(SyncFile {
            file_name,
            root,
            pairs,
            duration,
            elapsed_before: elapsed,
            custom_tests: custom_tests.into_iter().collect(),
        })
    }
}

/// Whether text owned by the partition at `root` (later partitions and
/// skipped subtrees left out) is worth narrating.
fn owns_significant_text(
    tree: &Presentation,
    excluded: &[bool],
    is_root: &HashSet<NodeId>,
    root: NodeId,
) -> bool {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if excluded[id.index()] || (id != root && is_root.contains(&id)) {
            continue;
        }
        let Some(node) = tree.node(id) else { continue };
        if node.text.as_deref().is_some_and(is_significant) {
            return true;
        }
        stack.extend(node.children.iter().copied());
    }
    false
}

/// Root of the partition that walks `id` in document order.
fn partition_of(tree: &Presentation, is_root: &HashSet<NodeId>, id: NodeId) -> NodeId {
    std::iter::once(id)
        .chain(tree.ancestors(id))
        .find(|n| is_root.contains(n))
        .unwrap_or(NodeId::ROOT)
}

/// Pick the targets that play at their reference instead of in place.
///
/// `candidates` are (reference, target) pairs in document order and `walked`
/// tells whether a node outside every chosen target is visited. A target is
/// chosen only while every chosen target stays reachable through its
/// reference; otherwise it keeps its place in document order.
fn plan_expansions(
    tree: &Presentation,
    candidates: &[(NodeId, NodeId)],
    walked: impl Fn(NodeId) -> bool,
) -> HashSet<NodeId> {
    // Chosen target -> reference it is played at.
    let mut via: HashMap<NodeId, NodeId> = HashMap::new();
    for &(reference, target) in candidates {
        if via.contains_key(&target) {
            continue;
        }
        via.insert(target, reference);
        if !via.values().all(|&r| is_reached(tree, &via, r, &walked)) {
            tracing::debug!(
                reference = reference.0,
                target = target.0,
                "reference not reached by the walk; target played in place"
            );
            via.remove(&target);
        }
    }
    via.into_keys().collect()
}

/// Whether the walk visits `reference`, following chosen targets up to a
/// node that is visited in document order.
fn is_reached(
    tree: &Presentation,
    via: &HashMap<NodeId, NodeId>,
    reference: NodeId,
    walked: &impl Fn(NodeId) -> bool,
) -> bool {
    let mut seen = HashSet::new();
    let mut current = reference;
    loop {
        let enclosing = std::iter::once(current)
            .chain(tree.ancestors(current))
            .find(|n| via.contains_key(n));
        let Some(target) = enclosing else {
            return walked(current);
        };
        let Some(&next) = via.get(&target) else {
            return false;
        };
        if !seen.insert(target) {
            return false;
        }
        current = next;
    }
}

/// Nodes the policy skips, together with their subtrees.
fn excluded_nodes<P: PartitionPolicy + ?Sized>(tree: &Presentation, policy: &P) -> Vec<bool> {
    let mut excluded = vec![false; tree.node_count()];
    let mut stack = vec![(tree.root(), false)];
    while let Some((id, parent_excluded)) = stack.pop() {
        let is_excluded = parent_excluded || policy.skips_partition(tree, id);
        if let Some(slot) = excluded.get_mut(id.index()) {
            *slot = is_excluded;
        }
        for &child in tree.children(id) {
            stack.push((child, is_excluded));
        }
    }
    excluded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::LevelPolicy;
    use crate::dtbook::ContentDocumentBuilder;
    use proptest::prelude::*;
    use tempfile::TempDir;

    struct Run {
        output: SyncOutput,
        doc: ContentDocument,
        nav: NavigationBuilder,
        dir: TempDir,
    }

    fn run_with<P: PartitionPolicy>(tree: &Presentation, policy: &P, expand: bool) -> Run {
        let dir = TempDir::new().unwrap();
        let mut ids = IdentifierAllocator::new();
        let mut doc = ContentDocumentBuilder::new(tree, policy, &mut ids).build();
        let mut nav = NavigationBuilder::new();
        let lists = vec!["note".to_string(), "sidebar".to_string()];
        let options = SyncOptions {
            expand_references: expand,
            nav_list_elements: &lists,
            file_prefix: "dtb_",
            uid: "uid",
            generator: "test",
        };
        let flow = SyncPartitioner::new(tree, policy, &mut doc, &mut ids, &mut nav, options)
            .run(dir.path(), &CancellationToken::new(), &mut |_| {})
            .unwrap();
        let ControlFlow::Continue(output) = flow else {
            panic!("not cancelled");
        };
        nav.assign_play_order();
        Run { output, doc, nav, dir }
    }

    fn run(tree: &Presentation) -> Run {
        run_with(tree, &LevelPolicy, true)
    }

    fn read(run: &Run, file: &str) -> String {
        std::fs::read_to_string(run.dir.path().join(file)).unwrap()
    }

    fn narrated(tree: &mut Presentation, parent: NodeId, name: &str, text: &str, ms: (u64, u64)) -> NodeId {
        let id = tree.append_element(parent, name);
        tree.append_text(id, text);
        tree.set_audio(id, AudioClip::new("audio.mp3", ms.0, ms.1));
        id
    }

    #[test]
    fn test_chapter_with_expanded_note() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        narrated(&mut tree, level, "h1", "Chapter 1", (0, 1000));
        let p = narrated(&mut tree, level, "p", "Body", (1000, 2500));
        let noteref = tree.append_element(p, "noteref");
        tree.set_attribute(noteref, "idref", "#n1");
        let note = tree.append_element(level, "note");
        tree.set_attribute(note, "id", "n1");
        narrated(&mut tree, note, "p", "The note", (2500, 3000));

        let run = run(&tree);
        assert_eq!(run.output.files.len(), 1);
        let file = &run.output.files[0];
        assert_eq!(file.file_name, "dtb_0001.smil");
        assert_eq!(file.pairs, 3);
        assert_eq!(file.duration, 3000);
        assert_eq!(run.output.total_duration, 3000);
        assert_eq!(file.custom_tests, vec![CustomTest::NoteReference]);

        let smil = read(&run, "dtb_0001.smil");
        // The note plays inside the reference's sequence.
        let noteref_seq = smil.find("class=\"noteref\"").unwrap();
        let note_seq = smil.find("class=\"note\"").unwrap();
        assert!(noteref_seq < note_seq);
        assert!(smil.contains("customTest=\"noteref\""));
        assert!(smil.contains("<meta name=\"dtb:totalElapsedTime\" content=\"0:00:00.000\"/>"));
        assert!(smil.contains("dur=\"0:00:03.000\" fill=\"remove\""));

        assert_eq!(run.nav.points().len(), 1);
        assert_eq!(run.nav.points()[0].depth, 1);
        assert_eq!(run.nav.points()[0].label.text, "Chapter 1");
        assert_eq!(run.nav.lists()[0].class, "note");
    }

    #[test]
    fn test_smilref_points_at_pair() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        let p = narrated(&mut tree, level, "p", "Text", (0, 10));

        let run = run(&tree);
        let el = run.doc.element_for(p).unwrap();
        let smilref = run.doc.xml.attr(el, "smilref").unwrap();
        assert!(smilref.starts_with("dtb_0001.smil#tcp"));
        let anchor = run.doc.anchor_id(p).unwrap();
        assert!(read(&run, "dtb_0001.smil").contains(&format!("src=\"dtbook.xml#{anchor}\"")));
    }

    #[test]
    fn test_partitions_split_at_levels() {
        let mut tree = Presentation::new("book");
        let front = tree.append_element(NodeId::ROOT, "frontmatter");
        narrated(&mut tree, front, "doctitle", "Title", (0, 500));
        for i in 0..2 {
            let level = tree.append_element(NodeId::ROOT, "level1");
            narrated(&mut tree, level, "h1", &format!("Chapter {i}"), (0, 1000));
            let sub = tree.append_element(level, "level2");
            narrated(&mut tree, sub, "h2", "Section", (0, 250));
        }

        let run = run(&tree);
        let names: Vec<_> = run.output.files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(
            names,
            ["dtb_0001.smil", "dtb_0002.smil", "dtb_0003.smil", "dtb_0004.smil", "dtb_0005.smil"]
        );
        assert_eq!(run.output.files[2].elapsed_before, 1500);
        assert_eq!(run.nav.points().len(), 4);
        assert_eq!(run.nav.max_depth(), 2);
        assert_eq!(run.nav.doc_title().unwrap().text, "Title");
    }

    #[test]
    fn test_partition_without_text_skipped() {
        let mut tree = Presentation::new("book");
        tree.append_element(NodeId::ROOT, "level1");
        let level = tree.append_element(NodeId::ROOT, "level1");
        narrated(&mut tree, level, "p", "Words", (0, 100));

        let run = run(&tree);
        assert_eq!(run.output.files.len(), 1);
        assert_eq!(run.output.files[0].root, level);
    }

    #[test]
    fn test_escapable_end_and_text_wrappers() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        let list = tree.append_element(level, "list");
        let first = tree.append_element(list, "li");
        tree.append_text(first, "One");
        let second = tree.append_element(list, "li");
        tree.append_text(second, "Two");

        let run = run(&tree);
        let smil = read(&run, "dtb_0001.smil");
        let second_anchor = run.doc.anchor_id(second).unwrap();
        assert_eq!(run.output.files[0].pairs, 2);
        assert_eq!(run.output.files[0].duration, 0);
        assert!(!smil.contains("<audio"));
        // The list escapes after its last item.
        let el = run.doc.element_for(second).unwrap();
        let smilref = run.doc.xml.attr(el, "smilref").unwrap();
        let last_par = smilref.split('#').nth(1).unwrap();
        assert!(smil.contains(&format!("end=\"DTBuserEscape;{last_par}.end\"")));
        assert!(smil.contains(&format!("src=\"dtbook.xml#{second_anchor}\"")));
    }

    #[test]
    fn test_text_under_audio_is_not_duplicated() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        let list = tree.append_element(level, "list");
        let li = narrated(&mut tree, list, "li", "Item", (0, 100));
        let em = tree.append_element(li, "em");
        tree.append_text(em, "emphasis");

        let run = run(&tree);
        assert_eq!(run.output.files[0].pairs, 1);
    }

    #[test]
    fn test_page_numbers() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        let page = narrated(&mut tree, level, "pagenum", "iv", (0, 300));
        tree.set_attribute(page, "page", "front");
        // No narration and no enclosing region: produces nothing.
        let silent = tree.append_element(level, "p");
        tree.append_text(silent, "silent");

        let run = run(&tree);
        let pages = run.nav.pages();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].kind, PageKind::Front);
        assert_eq!(pages[0].value, Some(4));
        assert_eq!(run.output.custom_tests.iter().copied().collect::<Vec<_>>(), vec![CustomTest::PageNumber]);
        assert!(read(&run, "dtb_0001.smil").contains("<customTest id=\"pagenum\" defaultState=\"false\" override=\"visible\"/>"));
    }

    #[test]
    fn test_no_expansion_keeps_document_order() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        let p = narrated(&mut tree, level, "p", "Body", (0, 100));
        let noteref = narrated(&mut tree, p, "noteref", "1", (100, 200));
        tree.set_attribute(noteref, "idref", "n1");
        let note = narrated(&mut tree, level, "note", "Note", (200, 300));
        tree.set_attribute(note, "id", "n1");

        let run = run_with(&tree, &LevelPolicy, false);
        let smil = read(&run, "dtb_0001.smil");
        let noteref_pos = smil.find("class=\"noteref\"").unwrap();
        let note_pos = smil.find("class=\"note\"").unwrap();
        assert!(noteref_pos < note_pos);
        assert_eq!(run.output.files[0].pairs, 3);
    }

    #[test]
    fn test_reference_cycle_terminates() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        let p = narrated(&mut tree, level, "p", "Body", (0, 100));
        let to_a = tree.append_element(p, "noteref");
        tree.set_attribute(to_a, "idref", "#a");

        let a = narrated(&mut tree, level, "note", "A", (100, 200));
        tree.set_attribute(a, "id", "a");
        let to_b = tree.append_element(a, "noteref");
        tree.set_attribute(to_b, "idref", "#b");

        let b = narrated(&mut tree, level, "note", "B", (200, 300));
        tree.set_attribute(b, "id", "b");
        let back = tree.append_element(b, "noteref");
        tree.set_attribute(back, "idref", "#a");

        let run = run(&tree);
        assert_eq!(run.output.files[0].pairs, 3);
        assert_eq!(run.output.files[0].duration, 300);
    }

    #[test]
    fn test_notes_referencing_only_each_other_are_played() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        narrated(&mut tree, level, "p", "Body", (0, 100));

        let a = narrated(&mut tree, level, "note", "A", (100, 200));
        tree.set_attribute(a, "id", "a");
        let to_b = tree.append_element(a, "noteref");
        tree.set_attribute(to_b, "idref", "#b");

        let b = narrated(&mut tree, level, "note", "B", (200, 300));
        tree.set_attribute(b, "id", "b");
        let to_a = tree.append_element(b, "noteref");
        tree.set_attribute(to_a, "idref", "#a");

        for expand in [true, false] {
            let run = run_with(&tree, &LevelPolicy, expand);
            assert_eq!(run.output.files[0].pairs, 3);
            assert_eq!(run.output.total_duration, 300);
            assert_eq!(run.nav.lists()[0].targets.len(), 2);
        }

        // The note that is reachable from the body plays inside its reference.
        let run = run(&tree);
        let smil = read(&run, "dtb_0001.smil");
        let noteref_seq = smil.find("class=\"noteref\"").unwrap();
        let last_note = smil.rfind("class=\"note\"").unwrap();
        assert!(noteref_seq < last_note);
    }

    #[test]
    fn test_note_referenced_from_unwalked_partition_plays_in_place() {
        let mut tree = Presentation::new("book");
        let first = tree.append_element(NodeId::ROOT, "level1");
        let noteref = tree.append_element(first, "noteref");
        tree.set_attribute(noteref, "idref", "#n");

        let second = tree.append_element(NodeId::ROOT, "level1");
        narrated(&mut tree, second, "p", "Body", (0, 100));
        let note = narrated(&mut tree, second, "note", "Note", (100, 200));
        tree.set_attribute(note, "id", "n");

        let run = run(&tree);
        assert_eq!(run.output.files.len(), 1);
        assert_eq!(run.output.files[0].root, second);
        assert_eq!(run.output.files[0].pairs, 2);
        assert_eq!(run.output.total_duration, 200);
        assert_eq!(run.nav.lists()[0].targets.len(), 1);
    }

    #[test]
    fn test_note_plays_once_at_first_reference() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        for (text, ms) in [("First", (0, 100)), ("Second", (200, 300))] {
            let p = narrated(&mut tree, level, "p", text, ms);
            let noteref = tree.append_element(p, "noteref");
            tree.set_attribute(noteref, "idref", "#n");
        }
        let note = narrated(&mut tree, level, "note", "Note", (100, 200));
        tree.set_attribute(note, "id", "n");

        let run = run(&tree);
        assert_eq!(run.output.files[0].pairs, 3);
        assert_eq!(run.output.total_duration, 300);
        let smil = read(&run, "dtb_0001.smil");
        let begins: Vec<_> = smil.match_indices("clipBegin=\"").map(|(i, _)| &smil[i + 11..i + 22]).collect();
        assert_eq!(begins, ["0:00:00.000", "0:00:00.100", "0:00:00.200"]);
    }

    #[test]
    fn test_plan_keeps_cycle_member_in_place() {
        let mut tree = Presentation::new("book");
        let a = tree.append_element(NodeId::ROOT, "note");
        let to_b = tree.append_element(a, "noteref");
        let b = tree.append_element(NodeId::ROOT, "note");
        let to_a = tree.append_element(b, "noteref");

        let planned = plan_expansions(&tree, &[(to_b, b), (to_a, a)], |_| true);
        assert_eq!(planned, HashSet::from([b]));
        let planned = plan_expansions(&tree, &[(to_b, b)], |_| false);
        assert!(planned.is_empty());
    }

    #[test]
    fn test_skipped_subtree_left_out() {
        struct SkipSidebars;
        impl PartitionPolicy for SkipSidebars {
            fn triggers_partition(&self, tree: &Presentation, node: NodeId) -> bool {
                LevelPolicy.triggers_partition(tree, node)
            }
            fn skips_partition(&self, tree: &Presentation, node: NodeId) -> bool {
                tree.node(node).and_then(|n| n.local_name()) == Some("sidebar")
            }
        }

        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        narrated(&mut tree, level, "p", "Kept", (0, 100));
        let sidebar = tree.append_element(level, "sidebar");
        narrated(&mut tree, sidebar, "p", "Dropped", (100, 200));

        let run = run_with(&tree, &SkipSidebars, true);
        assert_eq!(run.output.files[0].pairs, 1);
        assert!(run.nav.lists().is_empty());
        assert!(!run.doc.xml.to_xml_string().contains("Dropped"));
    }

    #[test]
    fn test_cancelled_before_first_partition() {
        let mut tree = Presentation::new("book");
        let level = tree.append_element(NodeId::ROOT, "level1");
        narrated(&mut tree, level, "p", "Text", (0, 10));

        let dir = TempDir::new().unwrap();
        let mut ids = IdentifierAllocator::new();
        let mut doc = ContentDocumentBuilder::new(&tree, &LevelPolicy, &mut ids).build();
        let mut nav = NavigationBuilder::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let options = SyncOptions {
            expand_references: true,
            nav_list_elements: &[],
            file_prefix: "dtb_",
            uid: "uid",
            generator: "test",
        };
        let flow = SyncPartitioner::new(&tree, &LevelPolicy, &mut doc, &mut ids, &mut nav, options)
            .run(dir.path(), &cancel, &mut |_| {})
            .unwrap();
        assert!(flow.is_break());
        assert!(!dir.path().join("dtb_0001.smil").exists());
    }

    #[test]
    fn test_cancelled_while_partition_in_progress() {
        let mut tree = Presentation::new("book");
        for i in 0..3u64 {
            let level = tree.append_element(NodeId::ROOT, "level1");
            narrated(&mut tree, level, "p", "Text", (i * 10, i * 10 + 10));
        }

        let dir = TempDir::new().unwrap();
        let mut ids = IdentifierAllocator::new();
        let mut doc = ContentDocumentBuilder::new(&tree, &LevelPolicy, &mut ids).build();
        let mut nav = NavigationBuilder::new();
        let cancel = CancellationToken::new();
        let options = SyncOptions {
            expand_references: true,
            nav_list_elements: &[],
            file_prefix: "dtb_",
            uid: "uid",
            generator: "test",
        };
        let mut events = Vec::new();
        let flow = SyncPartitioner::new(&tree, &LevelPolicy, &mut doc, &mut ids, &mut nav, options)
            .run(dir.path(), &cancel, &mut |event| {
                if matches!(event, ExportEvent::PartitionStarted { index: 1, .. }) {
                    cancel.cancel();
                }
                events.push(event.clone());
            })
            .unwrap();

        assert!(flow.is_break());
        assert!(dir.path().join("dtb_0001.smil").exists());
        assert!(!dir.path().join("dtb_0002.smil").exists());
        assert!(!events.iter().any(|e| matches!(e, ExportEvent::PartitionWritten { index: 1, .. })));
    }

    proptest! {
        #[test]
        fn prop_duration_is_sum_of_clips(clips in prop::collection::vec((0u64..10_000, 0u64..5_000), 1..12)) {
            let mut tree = Presentation::new("book");
            let level = tree.append_element(NodeId::ROOT, "level1");
            let mut expected = 0;
            for (begin, len) in &clips {
                narrated(&mut tree, level, "p", "words", (*begin, begin + len));
                expected += len;
            }
            let run = run(&tree);
            prop_assert_eq!(run.output.files[0].duration, expected);
            prop_assert_eq!(run.output.total_duration, expected);
        }
    }
}
