//! Visual signature stamp: signature image with a caption and date line
//! in the bottom-right corner of a page
//!
//! This is a picture of a signature, not a cryptographic signature.

use chrono::NaiveDate;
use tracing::info;

use super::document::Document;
use super::overlay::{apply_overlay, OverlayRequest, PlacedImage, RasterImage, Rgb, TextLine};
use crate::config::StampLayout;
use crate::date::format_date;
use crate::error::OverlayError;
use crate::layout::{anchor_bottom_right, PageDimensions};

/// Who signed, when, and with which image
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStamp {
    pub signer: String,
    pub date: NaiveDate,
    pub image: RasterImage,
    pub layout: StampLayout,
}

impl SignatureStamp {
    pub fn new(signer: impl Into<String>, date: NaiveDate, image: RasterImage) -> Self {
        Self {
            signer: signer.into(),
            date,
            image,
            layout: StampLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: StampLayout) -> Self {
        self.layout = layout;
        self
    }

    /// The overlay that draws this stamp on page `page_index` of `doc`
    ///
    /// A page without a usable MediaBox is treated as US Letter.
    pub fn overlay_for(&self, doc: &Document, page_index: usize) -> Result<OverlayRequest, OverlayError> {
        let page_count = doc.page_count();
        if page_index >= page_count {
            return Err(OverlayError::PageNotFound {
                index: page_index,
                page_count,
            });
        }
        let page = doc
            .page_media_box(page_index)
            .unwrap_or_else(|| PageDimensions::LETTER.media_box());
        let layout = &self.layout;
        let rect = anchor_bottom_right(
            &page,
            layout.width,
            layout.height,
            layout.margin_right,
            layout.margin_bottom,
        );

        let caption = TextLine {
            content: format!("{}{}", layout.caption_prefix, self.signer),
            x: rect.x,
            y: page.y + layout.caption_y,
            font_size: layout.caption_size,
            color: Rgb::BLACK,
        };
        let date = TextLine {
            content: format!(
                "{}{}",
                layout.date_prefix,
                format_date(&self.date, &layout.date_format)
            ),
            x: rect.x,
            y: page.y + layout.date_y,
            font_size: layout.date_size,
            color: Rgb::gray(layout.date_gray),
        };

        Ok(OverlayRequest {
            page_index,
            image: Some(PlacedImage {
                image: self.image.clone(),
                rect,
            }),
            text_lines: vec![caption, date],
        })
    }
}

/// Draw a signature stamp onto one page
pub fn apply_stamp(doc: &mut Document, page_index: usize, stamp: &SignatureStamp) -> Result<(), OverlayError> {
    let request = stamp.overlay_for(doc, page_index)?;
    apply_overlay(doc, &request)?;
    info!(page = page_index, signer = %stamp.signer, "applied signature stamp");
    Ok(())
}
