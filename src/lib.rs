//! # daisybook
//!
//! Export narrated, tree-structured documents as DAISY 3 (ANSI/NISO
//! Z39.86-2005) digital talking books.
//!
//! ## Features
//!
//! - Structural content document (DTBook) with regenerated, resolved ids
//! - Synchronization files (SMIL) split at sectioning levels, with escapable
//!   and skippable regions nested to any depth
//! - Navigation index (NCX) with headings, pages and special-content lists
//! - Package file (OPF) and optional zip container
//!
//! ## Quick Start
//!
//! ```no_run
//! use daisybook::{AudioClip, DaisyExporter, Exporter, Metadata, Presentation};
//!
//! let mut book = Presentation::new("book").with_metadata(
//!     Metadata::new("My Book")
//!         .with_author("Author Name")
//!         .with_identifier("urn:isbn:9780000000000"),
//! );
//! let root = book.root();
//! let chapter = book.append_element(root, "level1");
//! let h1 = book.append_element(chapter, "h1");
//! book.append_text(h1, "Chapter 1");
//! book.set_audio(h1, AudioClip::new("chapter1.mp3", 0, 2400));
//!
//! let outcome = DaisyExporter::new().export(&mut book, "out".as_ref())?;
//! assert!(!outcome.is_cancelled());
//! # Ok::<(), daisybook::Error>(())
//! ```

pub mod cancel;
pub mod classify;
pub mod dtbook;
pub mod error;
pub mod export;
pub mod ids;
pub mod model;
pub mod ncx;
pub mod smil;
pub(crate) mod util;
pub mod xml;

pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use export::{
    DaisyConfig, DaisyExporter, ExportEvent, ExportOutcome, ExportSummary, Exporter, Stage,
};
pub use ids::{IdNamespace, IdentifierAllocator};
pub use model::{AudioClip, ContentNode, Metadata, NodeId, Presentation};
