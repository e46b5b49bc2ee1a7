//! Drawing new content on top of existing pages
//!
//! An overlay never touches the page's existing content streams. The page's
//! `/Contents` is rewrapped as `[q, ...existing..., overlay]`: the leading
//! `q` stream saves the graphics state before the original drawing runs and
//! the overlay stream opens with `Q`, so whatever transform or color the
//! page leaves behind does not leak into the overlay.

use tracing::{debug, instrument};

use super::document::Document;
use super::writer::format_number;
use crate::error::OverlayError;
use crate::layout::Rect;
use crate::object::{Dictionary, Object, ObjectId};

/// Non-stroking fill color, components in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Self = Self::gray(0.0);

    pub const fn new(r: f64, g: f64, b: f64) -> Self {
        Self { r, g, b }
    }

    pub const fn gray(level: f64) -> Self {
        Self::new(level, level, level)
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Self::BLACK
    }
}

/// Pixel layout of a [`RasterImage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// One byte per pixel
    Gray8,
    /// Three bytes per pixel, RGB order
    Rgb8,
    /// Baseline JPEG data with one component, embedded as-is
    JpegGray,
    /// Baseline JPEG data with three components, embedded as-is
    JpegRgb,
}

impl ImageFormat {
    fn color_space(self) -> &'static str {
        match self {
            ImageFormat::Gray8 | ImageFormat::JpegGray => "DeviceGray",
            ImageFormat::Rgb8 | ImageFormat::JpegRgb => "DeviceRGB",
        }
    }

    fn is_jpeg(self) -> bool {
        matches!(self, ImageFormat::JpegGray | ImageFormat::JpegRgb)
    }

    fn channels(self) -> usize {
        match self {
            ImageFormat::Gray8 | ImageFormat::JpegGray => 1,
            ImageFormat::Rgb8 | ImageFormat::JpegRgb => 3,
        }
    }
}

/// Decoded or JPEG-encoded image, with an optional 8-bit alpha plane
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub alpha: Option<Vec<u8>>,
}

impl RasterImage {
    fn validate(&self) -> Result<(), OverlayError> {
        if self.width == 0 || self.height == 0 {
            return Err(OverlayError::InvalidImage(format!(
                "zero-sized image {}x{}",
                self.width, self.height
            )));
        }
        let pixels = self.width as usize * self.height as usize;
        if self.format.is_jpeg() {
            if !self.data.starts_with(&[0xFF, 0xD8]) {
                return Err(OverlayError::InvalidImage(
                    "JPEG data does not start with an SOI marker".into(),
                ));
            }
        } else {
            let expected = pixels * self.format.channels();
            if self.data.len() != expected {
                return Err(OverlayError::InvalidImage(format!(
                    "expected {expected} bytes of pixel data, got {}",
                    self.data.len()
                )));
            }
        }
        if let Some(alpha) = &self.alpha {
            if alpha.len() != pixels {
                return Err(OverlayError::InvalidImage(format!(
                    "expected {pixels} bytes of alpha, got {}",
                    alpha.len()
                )));
            }
        }
        Ok(())
    }
}

/// An image and where to draw it
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedImage {
    pub image: RasterImage,
    pub rect: Rect,
}

/// One line of text in the built-in font, baseline starting at `(x, y)`
#[derive(Debug, Clone, PartialEq)]
pub struct TextLine {
    pub content: String,
    pub x: f64,
    pub y: f64,
    pub font_size: f64,
    pub color: Rgb,
}

impl TextLine {
    fn validate(&self) -> Result<(), OverlayError> {
        if !self.font_size.is_finite() || self.font_size <= 0.0 {
            return Err(OverlayError::InvalidText(format!(
                "font size must be positive, got {}",
                self.font_size
            )));
        }
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(OverlayError::InvalidText(format!(
                "position ({}, {}) is not finite",
                self.x, self.y
            )));
        }
        Ok(())
    }
}

/// Content to draw on one page
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OverlayRequest {
    pub page_index: usize,
    pub image: Option<PlacedImage>,
    pub text_lines: Vec<TextLine>,
}

/// Draw an overlay onto a page of `doc`
///
/// Inputs are validated before the document is touched, so a failed call
/// leaves `doc` unchanged. Applying the same request twice draws it twice.
#[instrument(skip(doc, request), fields(page = request.page_index))]
pub fn apply_overlay(doc: &mut Document, request: &OverlayRequest) -> Result<(), OverlayError> {
    let pages = doc.page_ids();
    let page_id = *pages
        .get(request.page_index)
        .ok_or(OverlayError::PageNotFound {
            index: request.page_index,
            page_count: pages.len(),
        })?;

    if let Some(placed) = &request.image {
        placed.image.validate()?;
        let rect = placed.rect;
        if ![rect.x, rect.y, rect.width, rect.height].iter().all(|v| v.is_finite()) {
            return Err(OverlayError::InvalidImage("placement is not finite".into()));
        }
    }
    for line in &request.text_lines {
        line.validate()?;
    }

    let mut page = doc
        .graph()
        .get(page_id)
        .and_then(Object::as_dict)
        .cloned()
        .ok_or(OverlayError::MalformedPage(page_id))?;
    let mut resources = local_resources(doc, page_id);
    let mut ops = String::from("Q\n");

    if let Some(placed) = &request.image {
        let image_id = embed_image(doc, &placed.image);
        let name = add_resource(&mut resources, b"XObject", "Im", image_id);
        let rect = placed.rect;
        ops.push_str(&format!(
            "q\n{} 0 0 {} {} {} cm\n/{} Do\nQ\n",
            format_number(rect.width),
            format_number(rect.height),
            format_number(rect.x),
            format_number(rect.y),
            name
        ));
    }

    if !request.text_lines.is_empty() {
        let font_id = doc.ensure_font();
        let name = add_resource(&mut resources, b"Font", "F", font_id);
        for line in &request.text_lines {
            let color = line.color;
            ops.push_str(&format!(
                "BT\n/{} {} Tf\n{} {} {} rg\n{} {} Td\n({}) Tj\nET\n",
                name,
                format_number(line.font_size),
                format_number(color.r.clamp(0.0, 1.0)),
                format_number(color.g.clamp(0.0, 1.0)),
                format_number(color.b.clamp(0.0, 1.0)),
                format_number(line.x),
                format_number(line.y),
                escape_text(&encode_win_ansi(&line.content))
            ));
        }
    }

    let existing = doc.page_content_ids(request.page_index);
    let save = doc.add_stream(Dictionary::new(), b"q\n".to_vec());
    let overlay = doc.add_stream(Dictionary::new(), ops.into_bytes());
    let mut contents = Vec::with_capacity(existing.len() + 2);
    contents.push(Object::Reference(save));
    contents.extend(existing.iter().copied().map(Object::Reference));
    contents.push(Object::Reference(overlay));

    page.set("Resources", resources);
    page.set("Contents", contents);
    doc.graph_mut().replace(page_id, page);

    debug!(
        page = %page_id,
        image = request.image.is_some(),
        lines = request.text_lines.len(),
        "applied overlay"
    );
    Ok(())
}

/// Copy of the page's effective resources with every category the overlay
/// may extend made direct
///
/// Writing into the copy never changes a dictionary shared with other pages.
fn local_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let graph = doc.graph();
    let mut resources = doc
        .inherited_attribute(page_id, b"Resources")
        .and_then(|value| graph.resolve(value))
        .and_then(Object::as_dict)
        .cloned()
        .unwrap_or_default();
    for category in [&b"XObject"[..], &b"Font"[..]] {
        if let Some(value) = resources.get(category) {
            let direct = graph
                .resolve(value)
                .and_then(Object::as_dict)
                .cloned()
                .unwrap_or_default();
            resources.set(category, direct);
        }
    }
    resources
}

/// Register `id` under a fresh name in one resource category and return
/// the name
///
/// An entry already pointing at `id` is reused.
fn add_resource(
    resources: &mut Dictionary,
    category: &[u8],
    prefix: &str,
    id: ObjectId,
) -> String {
    let mut entries = resources
        .get(category)
        .and_then(Object::as_dict)
        .cloned()
        .unwrap_or_default();
    if let Some((name, _)) = entries
        .iter()
        .find(|(_, value)| value.as_reference() == Some(id))
    {
        return String::from_utf8_lossy(name).into_owned();
    }
    let name = (1..)
        .map(|n| format!("{prefix}{n}"))
        .find(|candidate| !entries.contains_key(candidate.as_bytes()))
        .unwrap_or_else(|| prefix.to_string());
    entries.set(name.as_bytes(), id);
    resources.set(category, entries);
    name
}

/// Add the image (and its soft mask) as XObject streams
fn embed_image(doc: &mut Document, image: &RasterImage) -> ObjectId {
    let smask = image.alpha.as_ref().map(|alpha| {
        let dict = Dictionary::from_iter([
            ("Type", Object::name("XObject")),
            ("Subtype", Object::name("Image")),
            ("Width", Object::Integer(image.width.into())),
            ("Height", Object::Integer(image.height.into())),
            ("ColorSpace", Object::name("DeviceGray")),
            ("BitsPerComponent", Object::Integer(8)),
        ]);
        doc.add_stream(dict, alpha.clone())
    });

    let mut dict = Dictionary::from_iter([
        ("Type", Object::name("XObject")),
        ("Subtype", Object::name("Image")),
        ("Width", Object::Integer(image.width.into())),
        ("Height", Object::Integer(image.height.into())),
        ("ColorSpace", Object::name(image.format.color_space())),
        ("BitsPerComponent", Object::Integer(8)),
    ]);
    if image.format.is_jpeg() {
        dict.set("Filter", Object::name("DCTDecode"));
    }
    if let Some(smask) = smask {
        dict.set("SMask", smask);
    }
    doc.add_stream(dict, image.data.clone())
}

/// WinAnsi code for the characters outside Latin-1 that the encoding maps
/// into `0x80..=0x9F`
fn win_ansi_extra(c: char) -> Option<u8> {
    let byte = match c {
        '€' => 0x80,
        '‚' => 0x82,
        'ƒ' => 0x83,
        '„' => 0x84,
        '…' => 0x85,
        '†' => 0x86,
        '‡' => 0x87,
        'ˆ' => 0x88,
        '‰' => 0x89,
        'Š' => 0x8A,
        '‹' => 0x8B,
        'Œ' => 0x8C,
        'Ž' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '•' => 0x95,
        '–' => 0x96,
        '—' => 0x97,
        '˜' => 0x98,
        '™' => 0x99,
        'š' => 0x9A,
        '›' => 0x9B,
        'œ' => 0x9C,
        'ž' => 0x9E,
        'Ÿ' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

/// Encode text for the built-in font; characters it cannot show become `?`
pub(crate) fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c as u32 {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            _ => win_ansi_extra(c).unwrap_or(b'?'),
        })
        .collect()
}

/// Body of a literal string operand, ASCII only
fn escape_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7E => out.push(b as char),
            _ => out.push_str(&format!("\\{b:03o}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ObjectGraph, Stream};

    /// Two pages sharing one resource dictionary, each with one content
    /// stream
    fn two_page_document() -> Document {
        let mut graph = ObjectGraph::new();
        let pages_id = graph.allocate();
        let resources = graph.insert(Dictionary::from_iter([(
            "XObject",
            Dictionary::from_iter([("Im1", Object::Null)]),
        )]));
        let mut kids = Vec::new();
        for i in 0..2 {
            let content = graph.insert(Stream::new(
                Dictionary::new(),
                format!("1 0 0 1 {i} 0 cm").into_bytes(),
            ));
            kids.push(Object::Reference(graph.insert(Dictionary::from_iter([
                ("Type", Object::name("Page")),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content)),
                ("Resources", Object::Reference(resources)),
            ]))));
        }
        graph.insert_at(
            pages_id,
            Dictionary::from_iter([
                ("Type", Object::name("Pages")),
                ("Count", Object::Integer(2)),
                ("Kids", Object::Array(kids)),
            ]),
        );
        let root = graph.insert(Dictionary::from_iter([
            ("Type", Object::name("Catalog")),
            ("Pages", Object::Reference(pages_id)),
        ]));
        Document::from_parts(graph, root, None, "1.7").unwrap()
    }

    fn line(content: &str) -> TextLine {
        TextLine {
            content: content.into(),
            x: 10.0,
            y: 20.0,
            font_size: 10.0,
            color: Rgb::BLACK,
        }
    }

    fn gray_image() -> PlacedImage {
        PlacedImage {
            image: RasterImage {
                data: vec![0, 128, 255, 64],
                width: 2,
                height: 2,
                format: ImageFormat::Gray8,
                alpha: Some(vec![255; 4]),
            },
            rect: Rect::new(412.0, 50.0, 150.0, 75.0),
        }
    }

    fn page_resources(doc: &Document, index: usize) -> Dictionary {
        doc.graph()
            .get(doc.page_ids()[index])
            .and_then(Object::as_dict)
            .and_then(|page| page.get(b"Resources"))
            .and_then(|r| doc.graph().resolve(r))
            .and_then(Object::as_dict)
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_overlay_keeps_existing_content() {
        let mut doc = two_page_document();
        let before = doc.page_content_streams(0).concat();
        apply_overlay(
            &mut doc,
            &OverlayRequest {
                page_index: 0,
                image: Some(gray_image()),
                text_lines: vec![line("Signed")],
            },
        )
        .unwrap();

        let streams = doc.page_content_streams(0);
        assert_eq!(streams.len(), 3);
        assert_eq!(streams[0], b"q\n");
        assert_eq!(streams[1], before.as_slice());
        let overlay = String::from_utf8(streams[2].to_vec()).unwrap();
        assert!(overlay.starts_with("Q\n"));
        assert!(overlay.contains("150 0 0 75 412 50 cm"));
        assert!(overlay.contains("(Signed) Tj"));
    }

    #[test]
    fn test_shared_resources_untouched() {
        let mut doc = two_page_document();
        apply_overlay(
            &mut doc,
            &OverlayRequest {
                page_index: 1,
                image: Some(gray_image()),
                text_lines: vec![],
            },
        )
        .unwrap();

        let untouched = page_resources(&doc, 0);
        let xobjects = untouched.get(b"XObject").and_then(Object::as_dict).unwrap();
        assert_eq!(xobjects.len(), 1);

        let changed = page_resources(&doc, 1);
        let xobjects = changed.get(b"XObject").and_then(Object::as_dict).unwrap();
        assert!(xobjects.contains_key(b"Im1"));
        assert!(xobjects.contains_key(b"Im2"));
    }

    #[test]
    fn test_font_shared_across_pages() {
        let mut doc = two_page_document();
        for page_index in 0..2 {
            apply_overlay(
                &mut doc,
                &OverlayRequest {
                    page_index,
                    image: None,
                    text_lines: vec![line("a"), line("b")],
                },
            )
            .unwrap();
        }
        let fonts = doc
            .graph()
            .iter()
            .filter(|(_, o)| o.as_dict().is_some_and(|d| d.has_type(b"Font")))
            .count();
        assert_eq!(fonts, 1);
    }

    #[test]
    fn test_applying_twice_draws_twice() {
        let mut doc = two_page_document();
        let request = OverlayRequest {
            page_index: 0,
            image: None,
            text_lines: vec![line("x")],
        };
        apply_overlay(&mut doc, &request).unwrap();
        apply_overlay(&mut doc, &request).unwrap();
        let content = String::from_utf8(doc.page_content(0)).unwrap();
        assert_eq!(content.matches("(x) Tj").count(), 2);
    }

    #[test]
    fn test_page_not_found() {
        let mut doc = two_page_document();
        let err = apply_overlay(
            &mut doc,
            &OverlayRequest {
                page_index: 7,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(err, OverlayError::PageNotFound { index: 7, page_count: 2 });
    }

    #[test]
    fn test_invalid_inputs_leave_document_unchanged() {
        let mut doc = two_page_document();
        let objects = doc.graph().len();

        let mut bad_image = gray_image();
        bad_image.image.data.pop();
        let err = apply_overlay(
            &mut doc,
            &OverlayRequest {
                page_index: 0,
                image: Some(bad_image),
                text_lines: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidImage(_)));

        let mut bad_line = line("x");
        bad_line.font_size = 0.0;
        let err = apply_overlay(
            &mut doc,
            &OverlayRequest {
                page_index: 0,
                image: None,
                text_lines: vec![bad_line],
            },
        )
        .unwrap_err();
        assert!(matches!(err, OverlayError::InvalidText(_)));
        assert_eq!(doc.graph().len(), objects);
    }

    #[test]
    fn test_jpeg_requires_soi_marker() {
        let image = RasterImage {
            data: vec![0x89, b'P', b'N', b'G'],
            width: 1,
            height: 1,
            format: ImageFormat::JpegRgb,
            alpha: None,
        };
        assert!(matches!(image.validate(), Err(OverlayError::InvalidImage(_))));
    }

    #[test]
    fn test_win_ansi_encoding() {
        assert_eq!(encode_win_ansi("Café €5"), b"Caf\xE9 \x805");
        assert_eq!(encode_win_ansi("日本"), b"??");
        assert_eq!(escape_text(b"a(b)\\\xE9"), "a\\(b\\)\\\\\\351");
    }
}
