//! Package file (OPF) generation.

use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::Metadata;
use crate::smil::ClockValue;
use crate::util::escape_xml;

const SMIL_MEDIA_TYPE: &str = "application/smil";

/// Book-level values needed to finish a manifest.
#[derive(Debug, Clone)]
pub struct PackageInfo<'a> {
    pub metadata: &'a Metadata,
    /// Total narration time in milliseconds.
    pub total_duration: u64,
    pub has_audio: bool,
}

/// Collects the produced artifacts and describes them to a reading system.
pub trait ManifestBuilder {
    /// Register one produced file. Called once per artifact.
    fn add(&mut self, href: &str, id: &str, media_type: &str);

    /// Write the manifest into `out_dir`, returning its path when a file was
    /// produced.
    fn finish(&mut self, out_dir: &Path, package: &PackageInfo<'_>) -> Result<Option<PathBuf>>;
}

/// Item in the OPF manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

/// Default manifest: a Z39.86 package file. Sync files form the spine in the
/// order they were added.
#[derive(Debug, Clone)]
pub struct OpfManifest {
    file_name: String,
    items: Vec<ManifestItem>,
}

impl OpfManifest {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            items: Vec::new(),
        }
    }

    pub fn items(&self) -> &[ManifestItem] {
        &self.items
    }
}

impl Default for OpfManifest {
    fn default() -> Self {
        Self::new("package.opf")
    }
}

impl ManifestBuilder for OpfManifest {
    fn add(&mut self, href: &str, id: &str, media_type: &str) {
        self.items.push(ManifestItem {
            id: id.to_string(),
            href: href.to_string(),
            media_type: media_type.to_string(),
        });
    }

    fn finish(&mut self, out_dir: &Path, package: &PackageInfo<'_>) -> Result<Option<PathBuf>> {
        let path = out_dir.join(&self.file_name);
        fs::write(&path, generate_opf(&self.file_name, package, &self.items))?;
        Ok(Some(path))
    }
}

/// Generate the package document.
fn generate_opf(file_name: &str, package: &PackageInfo<'_>, manifest: &[ManifestItem]) -> String {
    let metadata = package.metadata;
    let mut opf = String::new();

    opf.push_str(
        r#"<?xml version="1.0" encoding="utf-8"?>
<!DOCTYPE package PUBLIC "+//ISBN 0-9673008-1-9//DTD OEB 1.2 Package//EN" "http://openebook.org/dtds/oeb-1.2/oebpkg12.dtd">
<package xmlns="http://openebook.org/namespaces/oeb-package/1.0/" unique-identifier="uid">
  <metadata>
    <dc-metadata xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:oebpackage="http://openebook.org/namespaces/oeb-package/1.0/">
      <dc:Format>ANSI/NISO Z39.86-2005</dc:Format>
"#,
    );

    writeln!(
        opf,
        "      <dc:Title>{}</dc:Title>",
        escape_xml(&metadata.title)
    )
    .unwrap();
    for author in &metadata.authors {
        writeln!(opf, "      <dc:Creator>{}</dc:Creator>", escape_xml(author)).unwrap();
    }
    writeln!(
        opf,
        "      <dc:Language>{}</dc:Language>",
        escape_xml(metadata.language_or_default())
    )
    .unwrap();
    writeln!(
        opf,
        "      <dc:Identifier id=\"uid\">{}</dc:Identifier>",
        escape_xml(&metadata.identifier)
    )
    .unwrap();
    if let Some(ref publisher) = metadata.publisher {
        writeln!(
            opf,
            "      <dc:Publisher>{}</dc:Publisher>",
            escape_xml(publisher)
        )
        .unwrap();
    }
    if let Some(ref date) = metadata.date {
        writeln!(opf, "      <dc:Date>{}</dc:Date>", escape_xml(date)).unwrap();
    }
    opf.push_str("    </dc-metadata>\n");

    let (multimedia_type, multimedia_content) = if package.has_audio {
        ("audioFullText", "audio,text")
    } else {
        ("textNCX", "text")
    };
    opf.push_str("    <x-metadata>\n");
    writeln!(
        opf,
        "      <meta name=\"dtb:multimediaType\" content=\"{}\"/>",
        multimedia_type
    )
    .unwrap();
    writeln!(
        opf,
        "      <meta name=\"dtb:multimediaContent\" content=\"{}\"/>",
        multimedia_content
    )
    .unwrap();
    writeln!(
        opf,
        "      <meta name=\"dtb:totalTime\" content=\"{}\"/>",
        ClockValue(package.total_duration)
    )
    .unwrap();
    opf.push_str("    </x-metadata>\n  </metadata>\n");

    // Manifest, starting with the package file itself
    opf.push_str("  <manifest>\n");
    writeln!(
        opf,
        "    <item id=\"opf\" href=\"{}\" media-type=\"text/xml\"/>",
        escape_xml(file_name)
    )
    .unwrap();
    for item in manifest {
        writeln!(
            opf,
            "    <item id=\"{}\" href=\"{}\" media-type=\"{}\"/>",
            escape_xml(&item.id),
            escape_xml(&item.href),
            escape_xml(&item.media_type)
        )
        .unwrap();
    }
    opf.push_str("  </manifest>\n");

    opf.push_str("  <spine>\n");
    for item in manifest.iter().filter(|i| i.media_type == SMIL_MEDIA_TYPE) {
        writeln!(opf, "    <itemref idref=\"{}\"/>", escape_xml(&item.id)).unwrap();
    }
    opf.push_str("  </spine>\n</package>\n");

    opf
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_opf_contents() {
        let metadata = Metadata::new("Tom & Jerry")
            .with_author("A. Author")
            .with_identifier("isbn-1");
        let mut manifest = OpfManifest::default();
        manifest.add("dtbook.xml", "item1", "application/x-dtbook+xml");
        manifest.add("dtb_0001.smil", "item2", SMIL_MEDIA_TYPE);
        manifest.add("a.mp3", "item3", "audio/mpeg");
        manifest.add("dtb_0002.smil", "item4", SMIL_MEDIA_TYPE);

        let dir = TempDir::new().unwrap();
        let path = manifest
            .finish(
                dir.path(),
                &PackageInfo {
                    metadata: &metadata,
                    total_duration: 61_500,
                    has_audio: true,
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(path, dir.path().join("package.opf"));

        let opf = fs::read_to_string(path).unwrap();
        assert!(opf.contains("<dc:Title>Tom &amp; Jerry</dc:Title>"));
        assert!(opf.contains("<dc:Identifier id=\"uid\">isbn-1</dc:Identifier>"));
        assert!(opf.contains("<meta name=\"dtb:totalTime\" content=\"0:01:01.500\"/>"));
        assert!(opf.contains("content=\"audioFullText\""));
        assert!(opf.contains("<item id=\"item3\" href=\"a.mp3\" media-type=\"audio/mpeg\"/>"));
        let spine = &opf[opf.find("<spine>").unwrap()..];
        assert!(spine.contains("<itemref idref=\"item2\"/>\n    <itemref idref=\"item4\"/>"));
        assert!(!spine.contains("item3"));
    }

    #[test]
    fn test_text_only_package() {
        let metadata = Metadata::new("Quiet");
        let opf = generate_opf(
            "package.opf",
            &PackageInfo {
                metadata: &metadata,
                total_duration: 0,
                has_audio: false,
            },
            &[],
        );
        assert!(opf.contains("content=\"textNCX\""));
        assert!(opf.contains("<meta name=\"dtb:multimediaContent\" content=\"text\"/>"));
    }
}
