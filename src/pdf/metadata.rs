//! Document metadata and per-source reporting

use std::path::Path;

use super::document::Document;
use super::parser::parse;
use crate::error::{Error, Result};
use crate::object::Object;

/// Summary of one parsed document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentMetadata {
    /// Number of pages in the document
    pub page_count: usize,
    /// PDF version from the header or catalog
    pub version: String,
    /// Document title (if present)
    pub title: Option<String>,
    /// Document author (if present)
    pub author: Option<String>,
}

impl DocumentMetadata {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            page_count: doc.page_count(),
            version: doc.version().to_string(),
            title: info_text(doc, b"Title"),
            author: info_text(doc, b"Author"),
        }
    }
}

/// Read a text entry from the `/Info` dictionary
fn info_text(doc: &Document, key: &[u8]) -> Option<String> {
    let graph = doc.graph();
    let info = graph.get(doc.info()?)?.as_dict()?;
    match graph.resolve(info.get(key)?)? {
        Object::String(bytes, _) => Some(decode_text_string(bytes)),
        _ => None,
    }
}

/// Decode a PDF text string: UTF-16BE with a byte order mark, otherwise
/// treated as Latin-1
pub fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Extract metadata from a PDF file
pub fn extract_metadata(path: &Path) -> Result<DocumentMetadata> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let bytes = std::fs::read(path)?;
    let doc = parse(&bytes)?;
    Ok(DocumentMetadata::from_document(&doc))
}

/// Size and page count of one input, for showing before a merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSummary {
    pub name: String,
    pub byte_len: usize,
    pub page_count: usize,
}

impl SourceSummary {
    /// Human-readable size, e.g. `1.50 MB`
    pub fn size_label(&self) -> String {
        format_file_size(self.byte_len as u64)
    }
}

/// Totals over every source of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub sources: Vec<SourceSummary>,
    /// Names of inputs that could not be parsed, with the reason
    pub rejected: Vec<(String, String)>,
}

impl BatchSummary {
    pub fn total_pages(&self) -> usize {
        self.sources.iter().map(|s| s.page_count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.sources.iter().map(|s| s.byte_len as u64).sum()
    }

    pub fn total_size_label(&self) -> String {
        format_file_size(self.total_bytes())
    }
}

/// Parse every named buffer and summarize it; a bad buffer is recorded in
/// `rejected` and does not stop the rest
pub fn summarize<'a>(sources: impl IntoIterator<Item = (&'a str, &'a [u8])>) -> BatchSummary {
    let mut summary = BatchSummary::default();
    for (name, bytes) in sources {
        match parse(bytes) {
            Ok(doc) => summary.sources.push(SourceSummary {
                name: name.to_string(),
                byte_len: bytes.len(),
                page_count: doc.page_count(),
            }),
            Err(e) => summary.rejected.push((name.to_string(), e.to_string())),
        }
    }
    summary
}

/// Format a byte count with binary units and two decimals
///
/// Whole byte counts below 1 KB are shown without decimals.
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let exponent = ((bytes as f64).ln() / 1024f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);
    if exponent == 0 {
        return format!("{bytes} Bytes");
    }
    let value = bytes as f64 / 1024f64.powi(exponent as i32);
    format!("{value:.2} {}", UNITS[exponent])
}
