//! DAISY export pipeline.
//!
//! Provides the `Exporter` trait and the DAISY 3 implementation.
//!
//! # Architecture
//!
//! The exporter uses a builder pattern:
//! - `new()` creates an exporter with default configuration
//! - `with_config()` allows customization
//! - `export()` writes the book into an output directory
//!
//! The stages run in a fixed order: audio publishing, content document,
//! reference resolution, synchronization (which also fills the navigation
//! index), writing the content document and the navigation index, the
//! manifest, and optionally the container. Cancellation is checked between
//! stages and inside the synchronization walk.
//!
//! # Example
//!
//! ```no_run
//! use daisybook::export::{DaisyExporter, ExportOutcome, Exporter};
//! use daisybook::model::{AudioClip, Presentation};
//!
//! let mut book = Presentation::new("book");
//! let level = book.append_element(book.root(), "level1");
//! let h1 = book.append_element(level, "h1");
//! book.append_text(h1, "Chapter 1");
//! book.set_audio(h1, AudioClip::new("chapter1.mp3", 0, 1200));
//!
//! match DaisyExporter::new().export(&mut book, "out".as_ref())? {
//!     ExportOutcome::Completed(summary) => println!("{} ms", summary.total_duration),
//!     ExportOutcome::Cancelled => println!("cancelled"),
//! }
//! # Ok::<(), daisybook::Error>(())
//! ```

mod audio;
mod opf;
mod package;

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use crate::cancel::CancellationToken;
use crate::classify::{CustomTest, LevelPolicy, PartitionPolicy};
use crate::dtbook::{ContentDocumentBuilder, ReferenceResolver};
use crate::error::{Error, Result};
use crate::ids::{IdNamespace, IdentifierAllocator};
use crate::model::{NodeId, Presentation};
use crate::ncx::{NavigationBuilder, NcxHead};
use crate::smil::{SyncFile, SyncOptions, SyncPartitioner};
use crate::util::generated_uid;

pub use audio::{AudioPublisher, CopyAudio, PassthroughAudio, PublishedAsset};
pub use opf::{ManifestBuilder, ManifestItem, OpfManifest, PackageInfo};
pub use package::{ContainerPackager, ZipPackager};

/// Value of `dtb:generator` in the produced files.
pub const GENERATOR: &str = concat!("daisybook ", env!("CARGO_PKG_VERSION"));

const DTBOOK_MEDIA_TYPE: &str = "application/x-dtbook+xml";
const NCX_MEDIA_TYPE: &str = "application/x-dtbncx+xml";
const SMIL_MEDIA_TYPE: &str = "application/smil";

/// Trait for exporting presentations.
pub trait Exporter {
    /// Export `book` into `out_dir`, creating the directory if needed.
    fn export(&self, book: &mut Presentation, out_dir: &Path) -> Result<ExportOutcome>;
}

/// Configuration for DAISY export.
#[derive(Debug, Clone)]
pub struct DaisyConfig {
    /// Play note and annotation bodies where they are referenced.
    pub expand_references: bool,
    /// Elements collected into special-content navigation lists.
    pub nav_list_elements: Vec<String>,
    pub content_file_name: String,
    pub ncx_file_name: String,
    pub opf_file_name: String,
    /// Sync files are named `<prefix>0001.smil`, `<prefix>0002.smil`, ...
    pub sync_file_prefix: String,
    /// Bound for the search of a heading's parent entry (`None` = unbounded).
    pub heading_search_hops: Option<usize>,
    /// Zip the output directory when done.
    pub package: bool,
}

impl Default for DaisyConfig {
    fn default() -> Self {
        Self {
            expand_references: true,
            nav_list_elements: ["note", "annotation", "sidebar", "prodnote"]
                .into_iter()
                .map(String::from)
                .collect(),
            content_file_name: "dtbook.xml".to_string(),
            ncx_file_name: "navigation.ncx".to_string(),
            opf_file_name: "package.opf".to_string(),
            sync_file_prefix: "dtb_".to_string(),
            heading_search_hops: None,
            package: false,
        }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PublishAudio,
    ContentDocument,
    ResolveReferences,
    Synchronize,
    WriteContent,
    WriteNavigation,
    Manifest,
    Package,
}

/// Progress notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    StageStarted(Stage),
    /// A partition is about to be walked into the sync file `file`.
    PartitionStarted { index: usize, file: String },
    /// A sync file was written; `index` counts written files from 0.
    PartitionWritten { index: usize, file: String },
    /// A partition produced nothing and was dropped.
    PartitionSkipped { root: NodeId },
}

/// What an export produced.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct ExportSummary {
    /// Every file written, relative to the output directory.
    pub files: Vec<String>,
    pub sync_files: Vec<SyncFile>,
    /// Total narration time in milliseconds.
    pub total_duration: u64,
    pub max_depth: usize,
    pub total_page_count: usize,
    pub max_page_number: u32,
    pub custom_tests: Vec<CustomTest>,
    pub unresolved_references: Vec<String>,
    pub duplicate_ids: Vec<String>,
    pub archive: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum ExportOutcome {
    Completed(ExportSummary),
    /// Stopped through the cancellation token. The output directory holds
    /// whatever was written so far and is not a usable book.
    Cancelled,
}

impl ExportOutcome {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExportOutcome::Cancelled)
    }

    pub fn summary(&self) -> Option<&ExportSummary> {
        match self {
            ExportOutcome::Completed(summary) => Some(summary),
            ExportOutcome::Cancelled => None,
        }
    }
}

/// DAISY 3 (Z39.86-2005) exporter.
pub struct DaisyExporter {
    config: DaisyConfig,
    policy: Box<dyn PartitionPolicy>,
    cancel: CancellationToken,
}

impl DaisyExporter {
    /// Create a new exporter with default configuration.
    pub fn new() -> Self {
        Self {
            config: DaisyConfig::default(),
            policy: Box::new(LevelPolicy),
            cancel: CancellationToken::new(),
        }
    }

    /// Configure the exporter with custom settings.
    pub fn with_config(mut self, config: DaisyConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the default level-based partition policy.
    pub fn with_policy(mut self, policy: impl PartitionPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Use an existing cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops this exporter when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &DaisyConfig {
        &self.config
    }

    /// Export with the default collaborators, reporting progress to `progress`.
    pub fn export_with_progress(
        &self,
        book: &mut Presentation,
        out_dir: &Path,
        progress: &mut dyn FnMut(&ExportEvent),
    ) -> Result<ExportOutcome> {
        let mut manifest = OpfManifest::new(self.config.opf_file_name.as_str());
        self.export_with(book, out_dir, &mut PassthroughAudio, &mut manifest, progress)
    }

    /// Export with explicit audio and manifest collaborators.
    pub fn export_with(
        &self,
        book: &mut Presentation,
        out_dir: &Path,
        audio: &mut dyn AudioPublisher,
        manifest: &mut dyn ManifestBuilder,
        progress: &mut dyn FnMut(&ExportEvent),
    ) -> Result<ExportOutcome> {
        if out_dir.is_file() {
            return Err(Error::InvalidOutput(format!(
                "{} is a file",
                out_dir.display()
            )));
        }
        fs::create_dir_all(out_dir)?;
        if book.metadata.identifier.is_empty() {
            book.metadata.identifier = generated_uid();
            tracing::warn!(uid = %book.metadata.identifier, "publication has no identifier; generated one");
        }

        let config = &self.config;
        let policy = self.policy.as_ref();
        macro_rules! stage {
            ($stage:expr) => {
                if self.begin($stage, progress).is_break() {
                    return Ok(ExportOutcome::Cancelled);
                }
            };
        }

        stage!(Stage::PublishAudio);
        let assets = audio.flatten(book, out_dir)?;
        let book: &Presentation = book;

        stage!(Stage::ContentDocument);
        let mut ids = IdentifierAllocator::new();
        let mut doc = ContentDocumentBuilder::new(book, policy, &mut ids)
            .file_name(config.content_file_name.as_str())
            .build();

        stage!(Stage::ResolveReferences);
        let report = ReferenceResolver::new(&doc.id_map).resolve_all(&mut doc.xml, &doc.references);

        stage!(Stage::Synchronize);
        let mut nav = NavigationBuilder::new().with_heading_search_hops(config.heading_search_hops);
        let options = SyncOptions {
            expand_references: config.expand_references,
            nav_list_elements: &config.nav_list_elements,
            file_prefix: &config.sync_file_prefix,
            uid: &book.metadata.identifier,
            generator: GENERATOR,
        };
        let flow = SyncPartitioner::new(book, policy, &mut doc, &mut ids, &mut nav, options)
            .run(out_dir, &self.cancel, progress)?;
        let ControlFlow::Continue(sync) = flow else {
            return Ok(ExportOutcome::Cancelled);
        };
        nav.assign_play_order();

        stage!(Stage::WriteContent);
        doc.write(out_dir)?;

        stage!(Stage::WriteNavigation);
        let custom_tests: Vec<CustomTest> = sync.custom_tests.iter().copied().collect();
        let ncx = nav.to_ncx(&NcxHead {
            metadata: &book.metadata,
            custom_tests: &custom_tests,
            generator: GENERATOR,
        });
        fs::write(out_dir.join(&config.ncx_file_name), ncx)?;

        stage!(Stage::Manifest);
        let mut entries: Vec<(&str, &str)> = vec![
            (doc.file_name.as_str(), DTBOOK_MEDIA_TYPE),
            (config.ncx_file_name.as_str(), NCX_MEDIA_TYPE),
        ];
        entries.extend(sync.files.iter().map(|f| (f.file_name.as_str(), SMIL_MEDIA_TYPE)));
        entries.extend(assets.iter().map(|a| (a.file_name.as_str(), a.media_type.as_str())));
        for &(href, media_type) in &entries {
            manifest.add(href, &ids.next(IdNamespace::Manifest), media_type);
        }
        let mut files: Vec<String> = entries.iter().map(|(href, _)| href.to_string()).collect();

        let package_info = PackageInfo {
            metadata: &book.metadata,
            total_duration: sync.total_duration,
            has_audio: !assets.is_empty() || sync.total_duration > 0,
        };
        if let Some(path) = manifest.finish(out_dir, &package_info)?
            && let Ok(relative) = path.strip_prefix(out_dir)
        {
            files.push(relative.to_string_lossy().into_owned());
        }

        let archive = if config.package {
            stage!(Stage::Package);
            Some(ZipPackager::new().package(out_dir)?)
        } else {
            None
        };

        tracing::info!(
            files = files.len(),
            sync_files = sync.files.len(),
            duration_ms = sync.total_duration,
            "export finished"
        );
        Ok(ExportOutcome::Completed(ExportSummary {
            files,
            sync_files: sync.files,
            total_duration: sync.total_duration,
            max_depth: nav.max_depth(),
            total_page_count: nav.total_page_count(),
            max_page_number: nav.max_page_number(),
            custom_tests,
            unresolved_references: report.unresolved,
            duplicate_ids: doc.duplicate_ids.clone(),
            archive,
        }))
    }
}

impl DaisyExporter {
    /// Announce `stage`, or stop when cancellation was requested.
    fn begin(&self, stage: Stage, progress: &mut dyn FnMut(&ExportEvent)) -> ControlFlow<()> {
        if self.cancel.is_cancelled() {
            tracing::info!(?stage, "export cancelled");
            return ControlFlow::Break(());
        }
        tracing::info!(?stage, "stage started");
        progress(&ExportEvent::StageStarted(stage));
        ControlFlow::Continue(())
    }
}

impl Default for DaisyExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Exporter for DaisyExporter {
    fn export(&self, book: &mut Presentation, out_dir: &Path) -> Result<ExportOutcome> {
        self.export_with_progress(book, out_dir, &mut |_| {})
    }
}
