//! Zip container for a finished export directory.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::{Error, Result};

/// Turns an output directory into a distributable archive.
pub trait ContainerPackager {
    /// Package `dir` and return the path of the archive.
    fn package(&self, dir: &Path) -> Result<PathBuf>;
}

/// Writes `<dir>.zip` next to the output directory.
///
/// Audio is stored as-is (it is already compressed); everything else is
/// deflated.
#[derive(Debug, Clone, Default)]
pub struct ZipPackager {
    /// Compression level for deflate (0-9, default 6).
    pub compression_level: Option<u32>,
}

impl ZipPackager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ContainerPackager for ZipPackager {
    fn package(&self, dir: &Path) -> Result<PathBuf> {
        let Some(dir_name) = dir.file_name() else {
            return Err(Error::InvalidOutput(format!(
                "{} has no directory name",
                dir.display()
            )));
        };
        let archive = dir.with_file_name(format!("{}.zip", dir_name.to_string_lossy()));

        let mut files = Vec::new();
        collect_files(dir, dir, &mut files)?;
        files.sort();

        let compression_level = self.compression_level.unwrap_or(6);
        let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let deflated = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(compression_level as i64));

        let mut zip = ZipWriter::new(File::create(&archive)?);
        for relative in &files {
            let name = relative.replace('\\', "/");
            let options = if is_compressed_media(&name) {
                stored
            } else {
                deflated
            };
            zip.start_file(name.as_str(), options)?;
            let mut source = File::open(dir.join(relative))?;
            io::copy(&mut source, &mut zip)?;
        }
        zip.finish()?.flush()?;

        tracing::info!(archive = %archive.display(), files = files.len(), "container written");
        Ok(archive)
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            out.push(relative.to_string_lossy().into_owned());
        }
    }
    Ok(())
}

fn is_compressed_media(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    [".mp3", ".mp4", ".m4a", ".ogg", ".jpg", ".jpeg", ".png"]
        .iter()
        .any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    #[test]
    fn test_package_directory() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("book");
        fs::create_dir_all(out.join("audio")).unwrap();
        fs::write(out.join("dtbook.xml"), "<dtbook/>").unwrap();
        fs::write(out.join("audio/a.mp3"), b"id3").unwrap();

        let archive = ZipPackager::new().package(&out).unwrap();
        assert_eq!(archive, tmp.path().join("book.zip"));

        let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut names: Vec<_> = zip.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(names, ["audio/a.mp3", "dtbook.xml"]);

        let mut entry = zip.by_name("audio/a.mp3").unwrap();
        assert_eq!(entry.compression(), CompressionMethod::Stored);
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert_eq!(content, b"id3");
    }
}
