//! Audio publishing: making every referenced clip source available in the
//! output directory.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};
use crate::model::Presentation;
use crate::util::guess_media_type;

/// An asset placed in the output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct PublishedAsset {
    /// Path relative to the output directory.
    pub file_name: String,
    pub media_type: String,
}

/// Flattens the audio referenced by a presentation into the output directory.
///
/// Implementations may rewrite clip sources; the sync files are written from
/// the tree as it is after `flatten` returns.
pub trait AudioPublisher {
    fn flatten(&mut self, tree: &mut Presentation, out_dir: &Path) -> Result<Vec<PublishedAsset>>;
}

/// Distinct clip sources in document order.
fn clip_sources(tree: &Presentation) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for id in tree.iter_dfs() {
        if let Some(clip) = tree.node(id).and_then(|n| n.audio.as_ref())
            && seen.insert(clip.src.clone())
        {
            sources.push(clip.src.clone());
        }
    }
    sources
}

/// Leaves clip sources untouched.
///
/// Sources that already exist relative to the output directory are reported
/// as assets so they end up in the manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughAudio;

impl AudioPublisher for PassthroughAudio {
    fn flatten(&mut self, tree: &mut Presentation, out_dir: &Path) -> Result<Vec<PublishedAsset>> {
        let mut assets = Vec::new();
        for src in clip_sources(tree) {
            let decoded = percent_decode_str(&src).decode_utf8_lossy().into_owned();
            if out_dir.join(&decoded).is_file() {
                assets.push(PublishedAsset {
                    media_type: guess_media_type(&decoded).to_string(),
                    file_name: decoded,
                });
            } else {
                tracing::debug!(src = %src, "audio source not in output directory; left out of manifest");
            }
        }
        Ok(assets)
    }
}

/// Copies every referenced clip source from a source directory into the
/// output directory and points the clips at the copies.
#[derive(Debug, Clone)]
pub struct CopyAudio {
    source_dir: PathBuf,
}

impl CopyAudio {
    pub fn new(source_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
        }
    }
}

impl AudioPublisher for CopyAudio {
    fn flatten(&mut self, tree: &mut Presentation, out_dir: &Path) -> Result<Vec<PublishedAsset>> {
        let mut renamed: HashMap<String, String> = HashMap::new();
        let mut taken: HashSet<String> = HashSet::new();
        let mut assets = Vec::new();

        for src in clip_sources(tree) {
            let decoded = percent_decode_str(&src).decode_utf8_lossy().into_owned();
            let source = self.source_dir.join(&decoded);
            if !source.is_file() {
                return Err(Error::AudioPublish(format!(
                    "audio source {} not found",
                    source.display()
                )));
            }

            let name = unique_name(&decoded, &mut taken);
            fs::copy(&source, out_dir.join(&name)).map_err(|e| {
                Error::AudioPublish(format!("copying {}: {}", source.display(), e))
            })?;
            tracing::debug!(from = %source.display(), to = %name, "audio copied");

            assets.push(PublishedAsset {
                media_type: guess_media_type(&name).to_string(),
                file_name: name.clone(),
            });
            renamed.insert(src, name);
        }

        for node in tree.nodes_mut() {
            if let Some(clip) = node.audio.as_mut()
                && let Some(name) = renamed.get(&clip.src)
            {
                clip.src = name.clone();
            }
        }
        Ok(assets)
    }
}

/// Bare file name of `path`, suffixed with a counter when already taken.
fn unique_name(path: &str, taken: &mut HashSet<String>) -> String {
    let file = Path::new(path);
    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    if taken.insert(name.clone()) {
        return name;
    }

    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let ext = file
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}-{counter}{ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AudioClip, NodeId};
    use tempfile::TempDir;

    fn tree_with(sources: &[&str]) -> Presentation {
        let mut tree = Presentation::new("book");
        for src in sources {
            let p = tree.append_element(NodeId::ROOT, "p");
            tree.set_audio(p, AudioClip::new(*src, 0, 100));
        }
        tree
    }

    #[test]
    fn test_passthrough_registers_existing_assets() {
        let out = TempDir::new().unwrap();
        fs::write(out.path().join("a b.mp3"), b"id3").unwrap();
        let mut tree = tree_with(&["a%20b.mp3", "missing.mp3", "a%20b.mp3"]);

        let assets = PassthroughAudio.flatten(&mut tree, out.path()).unwrap();
        assert_eq!(
            assets,
            vec![PublishedAsset {
                file_name: "a b.mp3".to_string(),
                media_type: "audio/mpeg".to_string(),
            }]
        );
    }

    #[test]
    fn test_copy_flattens_and_renames() {
        let source = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("one")).unwrap();
        fs::create_dir_all(source.path().join("two")).unwrap();
        fs::write(source.path().join("one/track.mp3"), b"1").unwrap();
        fs::write(source.path().join("two/track.mp3"), b"2").unwrap();
        let mut tree = tree_with(&["one/track.mp3", "two/track.mp3"]);

        let assets = CopyAudio::new(source.path())
            .flatten(&mut tree, out.path())
            .unwrap();
        let names: Vec<_> = assets.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, ["track.mp3", "track-2.mp3"]);
        assert_eq!(fs::read(out.path().join("track-2.mp3")).unwrap(), b"2");

        let sources: Vec<_> = tree
            .iter_dfs()
            .filter_map(|id| tree.node(id).and_then(|n| n.audio.clone()))
            .map(|clip| clip.src)
            .collect();
        assert_eq!(sources, ["track.mp3", "track-2.mp3"]);
    }

    #[test]
    fn test_copy_missing_source_fails() {
        let source = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let mut tree = tree_with(&["nowhere.mp3"]);
        let err = CopyAudio::new(source.path())
            .flatten(&mut tree, out.path())
            .unwrap_err();
        assert!(matches!(err, Error::AudioPublish(_)));
    }
}
