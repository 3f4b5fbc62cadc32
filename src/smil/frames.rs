//! Stack of open playback regions.
//!
//! Each frame owns the `<seq>` container its pairs are written into. Closing
//! a frame back-fills what could only be known once its content was walked:
//! the escape target of escapable regions, and whether the region produced
//! anything at all.

use crate::classify::{CustomTest, Region};
use crate::model::NodeId;
use crate::xml::{XmlDocument, XmlNodeId};

#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub node: NodeId,
    pub region: Region,
    pub seq: XmlNodeId,
    pub seq_id: String,
    last_pair: Option<String>,
}

impl Frame {
    pub fn new(node: NodeId, region: Region, seq: XmlNodeId, seq_id: String) -> Self {
        Self {
            node,
            region,
            seq,
            seq_id,
            last_pair: None,
        }
    }
}

/// What remains of a frame after it was closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ClosedFrame {
    pub node: NodeId,
    /// Id of the sequence, or `None` when it was empty and removed.
    pub seq_id: Option<String>,
    /// Custom test the sequence was switched by, if any.
    pub custom_test: Option<CustomTest>,
}

#[derive(Debug, Default)]
pub(crate) struct RegionStack {
    frames: Vec<Frame>,
}

impl RegionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Open a region. Its sequence becomes the container for new pairs.
    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Sequence of the innermost open region.
    pub fn container(&self) -> Option<XmlNodeId> {
        self.frames.last().map(|f| f.seq)
    }

    /// Note a pair emitted inside every open region.
    pub fn record_pair(&mut self, pair_id: &str) {
        for frame in &mut self.frames {
            frame.last_pair = Some(pair_id.to_string());
        }
    }

    /// Close the innermost region.
    ///
    /// An empty sequence is detached from the output. Otherwise an escapable
    /// region gets its `end` condition pointing at the last pair inside it.
    pub fn pop(&mut self, smil: &mut XmlDocument) -> Option<ClosedFrame> {
        let frame = self.frames.pop()?;

        if smil.children(frame.seq).is_empty() {
            smil.detach(frame.seq);
            return Some(ClosedFrame {
                node: frame.node,
                seq_id: None,
                custom_test: None,
            });
        }

        let mut custom_test = None;
        match frame.region {
            Region::Escapable => {
                if let Some(last) = &frame.last_pair {
                    smil.set_attr(frame.seq, "end", format!("DTBuserEscape;{last}.end"));
                }
            }
            Region::Skippable(test) => custom_test = Some(test),
            Region::Heading => {}
        }

        Some(ClosedFrame {
            node: frame.node,
            seq_id: Some(frame.seq_id),
            custom_test,
        })
    }
}
