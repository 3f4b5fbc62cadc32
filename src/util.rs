//! Small text and path helpers shared by the writers.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

/// Characters escaped when a file name is used as a URI reference.
const SRC_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Escape XML special characters.
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Whether text carries something worth narrating (any letter or digit).
pub fn is_significant(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Percent-encode an asset path for use in a `src` attribute.
///
/// Already-encoded input is decoded first so that `%20` is not doubled.
pub fn encode_src(src: &str) -> String {
    let decoded = percent_decode_str(src).decode_utf8_lossy();
    utf8_percent_encode(&decoded, SRC_ENCODE_SET).to_string()
}

/// Identifier for publications that carry none, derived from the clock.
pub fn generated_uid() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(12345);
    format!("daisybook-{nanos:x}")
}

/// Guess a media type from a file extension.
pub fn guess_media_type(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "mp3" => "audio/mpeg",
        "mp4" | "m4a" => "audio/mpeg4-aac",
        "wav" => "audio/x-wav",
        "ogg" => "audio/ogg",
        "smil" => "application/smil",
        "ncx" => "application/x-dtbncx+xml",
        "xml" => "application/x-dtbook+xml",
        "opf" => "text/xml",
        "css" => "text/css",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_significant() {
        assert!(is_significant("  a "));
        assert!(is_significant("4"));
        assert!(!is_significant(" \n\t"));
        assert!(!is_significant("... --"));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  Chapter\n  1 "), "Chapter 1");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[test]
    fn test_encode_src() {
        assert_eq!(encode_src("ch 1.mp3"), "ch%201.mp3");
        assert_eq!(encode_src("ch%201.mp3"), "ch%201.mp3");
        assert_eq!(encode_src("audio/part#2.mp3"), "audio/part%232.mp3");
    }

    #[test]
    fn test_generated_uid() {
        assert!(generated_uid().starts_with("daisybook-"));
    }

    #[test]
    fn test_guess_media_type() {
        assert_eq!(guess_media_type("a.MP3"), "audio/mpeg");
        assert_eq!(guess_media_type("dtb_0001.smil"), "application/smil");
        assert_eq!(guess_media_type("dtbook.xml"), "application/x-dtbook+xml");
        assert_eq!(guess_media_type("blob"), "application/octet-stream");
    }
}
