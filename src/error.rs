//! Error types for the PDF assembler library
//!
//! Each stage of the pipeline has its own error enum so a caller can show a
//! specific message per failed file. [`Error`] wraps them all.

use std::path::PathBuf;
use thiserror::Error;

use crate::object::ObjectId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the PDF assembler library
#[derive(Error, Debug)]
pub enum Error {
    /// Input could not be parsed
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Merge request was rejected
    #[error("merge error: {0}")]
    Merge(#[from] MergeError),

    /// Overlay could not be applied
    #[error("overlay error: {0}")]
    Overlay(#[from] OverlayError),

    /// Output could not be written
    #[error("serialize error: {0}")]
    Serialize(#[from] SerializeError),

    /// A merge-and-sign job failed
    #[error("job error: {0}")]
    Job(#[from] JobError),

    /// Configuration could not be loaded
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Invalid date expression
    #[error("Invalid date expression: {0}")]
    InvalidDateExpression(String),

    /// Invalid page range expression
    #[error("Invalid page range: {0}")]
    InvalidPageRange(String),
}

/// Reasons a byte buffer is rejected by the parser
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    /// No `%PDF-x.y` header near the start of the buffer
    #[error("missing or malformed %PDF header")]
    MalformedHeader,

    /// The buffer ends inside an object
    #[error("object truncated at byte {offset}")]
    TruncatedObject { offset: usize },

    /// Syntax error inside an object
    #[error("malformed object at byte {offset}: {reason}")]
    MalformedObject { offset: usize, reason: String },

    /// A reference points at an object that does not exist in the file
    #[error("unresolvable reference to object {0}")]
    UnresolvableReference(ObjectId),

    /// No catalog, no /Pages node, or no pages at all
    #[error("document has no page tree")]
    NoPageTree,

    /// A page tree node is reachable from itself
    #[error("page tree node {0} is part of a cycle")]
    CyclicPageTree(ObjectId),

    /// The document is encrypted
    #[error("encrypted documents are not supported")]
    Encrypted,

    /// An xref or object stream uses a filter we cannot decode
    #[error("unsupported stream filter: {0}")]
    UnsupportedFilter(String),
}

/// Structural problems with a merge request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    /// Fewer than one page selected in total
    #[error("merge request selects no pages")]
    EmptyRequest,

    /// A selected page does not exist in its source
    #[error("request {request}: page index {index} out of range (source has {page_count} pages)")]
    PageIndexOutOfRange {
        request: usize,
        index: usize,
        page_count: usize,
    },

    /// A source buffer failed to parse
    #[error("request {request}: source could not be parsed: {source}")]
    SourceUnparseable {
        request: usize,
        #[source]
        source: ParseError,
    },
}

/// Problems applying an overlay to a page
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OverlayError {
    /// Target page index is out of range
    #[error("page {index} not found (document has {page_count} pages)")]
    PageNotFound { index: usize, page_count: usize },

    /// Image data does not match its declared shape or format
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// A text line cannot be drawn
    #[error("invalid text line: {0}")]
    InvalidText(String),

    /// The target page dictionary is not usable
    #[error("page {0} is not a page dictionary")]
    MalformedPage(ObjectId),
}

/// Internal invariant violations found while writing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SerializeError {
    /// The document root is not in the object graph
    #[error("document root {0} is missing")]
    MissingRoot(ObjectId),

    /// A reachable object references an id that does not exist
    #[error("object {from} references missing object {to}")]
    DanglingReference { from: ObjectId, to: ObjectId },
}

/// Failure of a whole merge-and-sign job
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JobError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("overlay {overlay}: {source}")]
    Overlay {
        overlay: usize,
        #[source]
        source: OverlayError,
    },

    #[error(transparent)]
    Serialize(#[from] SerializeError),

    /// The caller raised the cancel flag
    #[error("job cancelled")]
    Cancelled,

    /// The job was stepped after it finished or failed
    #[error("job already finished")]
    Finished,
}

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(#[from] toml::de::Error),
}
