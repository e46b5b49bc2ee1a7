//! PDF Assembler Library
//!
//! A document assembly engine for PDF. It reads PDF byte buffers into a
//! typed object graph, copies and reorders pages from several sources into
//! one document, draws new content (a signature image and caption lines) on
//! top of existing pages, and writes the result back out as a valid file.
//!
//! - [`pdf::parse`]: bytes to [`pdf::Document`]
//! - [`pdf::merge`]: pages from many documents into one
//! - [`pdf::apply_overlay`] and [`pdf::apply_stamp`]: draw on a page
//! - [`pdf::serialize`]: document to bytes
//! - [`pipeline::Job`]: all of the above as one cancellable job
//!
//! # Example
//!
//! ```no_run
//! use pdf_assembler::pdf::{merge, parse, serialize, MergeRequest};
//!
//! let first = parse(&std::fs::read("1. intro.pdf")?)?;
//! let second = parse(&std::fs::read("2. advanced.pdf")?)?;
//! let merged = merge(&[MergeRequest::all(&first), MergeRequest::all(&second)])?;
//! std::fs::write("merged.pdf", serialize(&merged)?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod date;
pub mod error;
pub mod layout;
pub mod object;
pub mod pdf;
pub mod pipeline;

// Re-export commonly used items
pub use config::{EngineConfig, StampLayout};
pub use error::{Error, Result};
pub use pdf::Document;
