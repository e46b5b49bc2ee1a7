//! PDF reading, composition, overlay, and writing

mod document;
mod filter;
mod lexer;
pub mod merge;
pub mod metadata;
pub mod overlay;
pub mod parser;
pub mod stamp;
pub mod writer;

// Re-export commonly used items
pub use document::Document;
pub use merge::{merge, parse_page_ranges, Compositor, Merge, MergeRequest, PageSelection, Progress, SourcePlan};
pub use metadata::{
    extract_metadata, format_file_size, summarize, BatchSummary, DocumentMetadata,
    SourceSummary,
};
pub use overlay::{
    apply_overlay, ImageFormat, OverlayRequest, PlacedImage, RasterImage, Rgb, TextLine,
};
pub use parser::{parse, parse_batch};
pub use stamp::{apply_stamp, SignatureStamp};
pub use writer::{serialize, serialize_with, WriteOptions};
