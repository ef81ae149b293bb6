//! Content sniffing from leading signature bytes.
//!
//! The detected type is the only type the pipeline trusts. Response headers
//! and URL extensions are never consulted.

use std::fmt;
use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Serialize, Serializer};

/// The closed set of types forwarded to conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupportedMime {
    Pdf,
    Docx,
    Pptx,
    Xlsx,
    Html,
    PlainText,
    Rtf,
    Csv,
    Json,
    Xml,
    Zip,
    Epub,
    Jpeg,
    Png,
    Gif,
}

impl SupportedMime {
    pub const ALL: [SupportedMime; 15] = [
        SupportedMime::Pdf,
        SupportedMime::Docx,
        SupportedMime::Pptx,
        SupportedMime::Xlsx,
        SupportedMime::Html,
        SupportedMime::PlainText,
        SupportedMime::Rtf,
        SupportedMime::Csv,
        SupportedMime::Json,
        SupportedMime::Xml,
        SupportedMime::Zip,
        SupportedMime::Epub,
        SupportedMime::Jpeg,
        SupportedMime::Png,
        SupportedMime::Gif,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SupportedMime::Pdf => "application/pdf",
            SupportedMime::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            SupportedMime::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            SupportedMime::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            SupportedMime::Html => "text/html",
            SupportedMime::PlainText => "text/plain",
            SupportedMime::Rtf => "text/rtf",
            SupportedMime::Csv => "text/csv",
            SupportedMime::Json => "application/json",
            SupportedMime::Xml => "text/xml",
            SupportedMime::Zip => "application/zip",
            SupportedMime::Epub => "application/epub+zip",
            SupportedMime::Jpeg => "image/jpeg",
            SupportedMime::Png => "image/png",
            SupportedMime::Gif => "image/gif",
        }
    }

    /// File extension (with the leading dot) used to name the temp file.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            SupportedMime::Pdf => ".pdf",
            SupportedMime::Docx => ".docx",
            SupportedMime::Pptx => ".pptx",
            SupportedMime::Xlsx => ".xlsx",
            SupportedMime::Html => ".html",
            SupportedMime::PlainText => ".txt",
            SupportedMime::Rtf => ".rtf",
            SupportedMime::Csv => ".csv",
            SupportedMime::Json => ".json",
            SupportedMime::Xml => ".xml",
            SupportedMime::Zip => ".zip",
            SupportedMime::Epub => ".epub",
            SupportedMime::Jpeg => ".jpg",
            SupportedMime::Png => ".png",
            SupportedMime::Gif => ".gif",
        }
    }
}

impl fmt::Display for SupportedMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SupportedMime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const EPUB_MIMETYPE_ENTRY: &[u8] = b"mimetypeapplication/epub+zip";
const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Lines inspected when deciding whether text is CSV.
const CSV_SAMPLE_LINES: usize = 20;

/// Classify `bytes` by signature. `None` means unsupported or undetermined.
#[must_use]
pub fn sniff(bytes: &[u8]) -> Option<SupportedMime> {
    if bytes.is_empty() {
        return None;
    }
    sniff_binary(bytes).or_else(|| sniff_text(bytes))
}

fn sniff_binary(bytes: &[u8]) -> Option<SupportedMime> {
    if bytes.starts_with(b"%PDF-") {
        Some(SupportedMime::Pdf)
    } else if bytes.starts_with(PNG_MAGIC) {
        Some(SupportedMime::Png)
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some(SupportedMime::Gif)
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(SupportedMime::Jpeg)
    } else if bytes.starts_with(b"{\\rtf") {
        Some(SupportedMime::Rtf)
    } else if bytes.starts_with(ZIP_MAGIC) {
        Some(refine_zip(bytes))
    } else {
        None
    }
}

/// The first local header of an EPUB names an uncompressed `mimetype` entry
/// at offset 30; OOXML packages are recognized by their part directories.
fn refine_zip(bytes: &[u8]) -> SupportedMime {
    if bytes
        .get(30..30 + EPUB_MIMETYPE_ENTRY.len())
        .is_some_and(|entry| entry == EPUB_MIMETYPE_ENTRY)
    {
        return SupportedMime::Epub;
    }

    let Some(ac) = ooxml_parts() else {
        return SupportedMime::Zip;
    };
    match ac.find(bytes).map(|m| m.pattern().as_usize()) {
        Some(0) => SupportedMime::Docx,
        Some(1) => SupportedMime::Pptx,
        Some(2) => SupportedMime::Xlsx,
        _ => SupportedMime::Zip,
    }
}

fn ooxml_parts() -> Option<&'static AhoCorasick> {
    static PARTS: OnceLock<Option<AhoCorasick>> = OnceLock::new();
    PARTS
        .get_or_init(|| {
            AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostFirst)
                .build(["word/", "ppt/", "xl/"])
                .inspect_err(|e| tracing::warn!("OOXML part matcher build failed: {e}"))
                .ok()
        })
        .as_ref()
}

fn sniff_text(bytes: &[u8]) -> Option<SupportedMime> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes).ok()?;
    if text.bytes().any(is_disallowed_control) {
        return None;
    }

    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return None;
    }

    let head = head_lowercase(trimmed, 256);
    if head.starts_with("<?xml") {
        return Some(SupportedMime::Xml);
    }
    if ["<!doctype html", "<html", "<head", "<body"]
        .iter()
        .any(|tag| head.starts_with(tag))
    {
        return Some(SupportedMime::Html);
    }
    if (trimmed.starts_with('{') || trimmed.starts_with('['))
        && serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_ok()
    {
        return Some(SupportedMime::Json);
    }
    if looks_like_csv(trimmed) {
        return Some(SupportedMime::Csv);
    }
    Some(SupportedMime::PlainText)
}

fn is_disallowed_control(b: u8) -> bool {
    b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r' | 0x0C)
}

fn head_lowercase(text: &str, max: usize) -> String {
    text.chars().take(max).collect::<String>().to_ascii_lowercase()
}

fn looks_like_csv(text: &str) -> bool {
    let mut lines = text
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .take(CSV_SAMPLE_LINES);

    let Some(first) = lines.next() else {
        return false;
    };
    let columns = first.matches(',').count();
    if columns == 0 {
        return false;
    }

    let mut rows = 1;
    for line in lines {
        if line.matches(',').count() != columns {
            return false;
        }
        rows += 1;
    }
    rows >= 2
}

#[cfg(test)]
mod tests {
    use super::{SupportedMime, sniff};

    fn zip_with_entry(name: &str, rest: &[u8]) -> Vec<u8> {
        let mut bytes = b"PK\x03\x04".to_vec();
        bytes.extend_from_slice(&[0u8; 22]);
        bytes.extend_from_slice(&(name.len() as u16).to_le_bytes());
        bytes.extend_from_slice(&[0u8; 2]);
        bytes.extend_from_slice(name.as_bytes());
        bytes.extend_from_slice(rest);
        bytes
    }

    #[test]
    fn binary_signatures() {
        assert_eq!(sniff(b"%PDF-1.7\n%\xe2\xe3"), Some(SupportedMime::Pdf));
        assert_eq!(sniff(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), Some(SupportedMime::Png));
        assert_eq!(sniff(b"GIF89a\x01\x00"), Some(SupportedMime::Gif));
        assert_eq!(sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10]), Some(SupportedMime::Jpeg));
        assert_eq!(sniff(b"{\\rtf1\\ansi hello}"), Some(SupportedMime::Rtf));
    }

    #[test]
    fn zip_containers_are_refined() {
        assert_eq!(
            sniff(&zip_with_entry("mimetype", b"application/epub+zip")),
            Some(SupportedMime::Epub)
        );
        assert_eq!(
            sniff(&zip_with_entry("[Content_Types].xml", b"...word/document.xml")),
            Some(SupportedMime::Docx)
        );
        assert_eq!(
            sniff(&zip_with_entry("ppt/slides/slide1.xml", b"")),
            Some(SupportedMime::Pptx)
        );
        assert_eq!(
            sniff(&zip_with_entry("xl/workbook.xml", b"")),
            Some(SupportedMime::Xlsx)
        );
        assert_eq!(
            sniff(&zip_with_entry("notes.txt", b"plain")),
            Some(SupportedMime::Zip)
        );
    }

    #[test]
    fn markup_and_structured_text() {
        assert_eq!(
            sniff(b"\xEF\xBB\xBF  <!DOCTYPE html><html></html>"),
            Some(SupportedMime::Html)
        );
        assert_eq!(sniff(b"<html><body>x</body></html>"), Some(SupportedMime::Html));
        assert_eq!(
            sniff(b"<?xml version=\"1.0\"?><root/>"),
            Some(SupportedMime::Xml)
        );
        assert_eq!(sniff(br#"{"a": [1, 2]}"#), Some(SupportedMime::Json));
        assert_eq!(sniff(b"name,age\nada,36\nalan,41\n"), Some(SupportedMime::Csv));
    }

    #[test]
    fn near_misses_fall_back_to_plain_text() {
        assert_eq!(sniff(b"{not json"), Some(SupportedMime::PlainText));
        assert_eq!(sniff(b"a,b\nc\n"), Some(SupportedMime::PlainText));
        assert_eq!(sniff(b"just one, line"), Some(SupportedMime::PlainText));
        assert_eq!(sniff(b"Hello, world.\n"), Some(SupportedMime::PlainText));
    }

    #[test]
    fn unknown_binary_is_unsupported() {
        assert_eq!(sniff(b""), None);
        assert_eq!(sniff(b"   \n\t"), None);
        assert_eq!(sniff(&[0x7F, b'E', b'L', b'F', 2, 1, 1, 0]), None);
        assert_eq!(sniff(&[0x00, 0x01, 0x02, 0xFE]), None);
        assert_eq!(sniff(b"text with a \0 nul"), None);
    }

    #[test]
    fn every_type_has_a_distinct_extension() {
        let mut seen = std::collections::HashSet::new();
        for mime in SupportedMime::ALL {
            assert!(mime.extension().starts_with('.'));
            assert!(seen.insert(mime.extension()), "{mime}");
        }
    }
}
