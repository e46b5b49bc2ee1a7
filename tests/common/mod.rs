//! Hand-written PDF fixtures for integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

/// Builds a PDF byte buffer object by object, in the order objects are
/// added, with an exact classic cross-reference table
#[derive(Debug, Clone)]
pub struct PdfBuilder {
    version: String,
    objects: Vec<(u32, Vec<u8>)>,
    root: u32,
    info: Option<u32>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        Self {
            version: "1.4".to_string(),
            objects: Vec::new(),
            root: 1,
            info: None,
        }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn root(mut self, number: u32) -> Self {
        self.root = number;
        self
    }

    pub fn info(mut self, number: u32) -> Self {
        self.info = Some(number);
        self
    }

    /// Add an object whose body is written verbatim
    pub fn object(mut self, number: u32, body: &str) -> Self {
        self.objects.push((number, body.as_bytes().to_vec()));
        self
    }

    /// Add a stream with a correct `/Length`
    pub fn stream(mut self, number: u32, extra_dict: &str, content: &[u8]) -> Self {
        let mut body = format!("<< /Length {} {extra_dict} >>\nstream\n", content.len()).into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(b"\nendstream");
        self.objects.push((number, body));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = format!("%PDF-{}\n%\u{e2}\u{e3}\u{cf}\u{d3}\n", self.version).into_bytes();
        let mut offsets = BTreeMap::new();
        for (number, body) in &self.objects {
            offsets.insert(*number, out.len());
            out.extend_from_slice(format!("{number} 0 obj\n").as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let size = offsets.keys().max().map_or(1, |max| max + 1);
        let xref = out.len();
        out.extend_from_slice(format!("xref\n0 {size}\n0000000000 65535 f\r\n").as_bytes());
        for number in 1..size {
            let line = match offsets.get(&number) {
                Some(offset) => format!("{offset:010} 00000 n\r\n"),
                None => "0000000000 65535 f\r\n".to_string(),
            };
            out.extend_from_slice(line.as_bytes());
        }
        let info = self
            .info
            .map(|n| format!(" /Info {n} 0 R"))
            .unwrap_or_default();
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {size} /Root {} 0 R{info} >>\nstartxref\n{xref}\n%%EOF\n",
                self.root
            )
            .as_bytes(),
        );
        out
    }
}

impl Default for PdfBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Content stream of page `index` in [`simple_pdf`]
pub fn page_text(label: &str, index: usize) -> Vec<u8> {
    format!("BT /F1 12 Tf 72 720 Td ({label} page {index}) Tj ET").into_bytes()
}

/// A document with `pages` pages sharing one font through an inherited
/// resource dictionary
///
/// Objects: 1 catalog, 2 page tree, 3 font, 4 resources, then page `i` is
/// `5 + 2i` and its content stream `6 + 2i`.
pub fn simple_pdf_builder(label: &str, pages: usize) -> PdfBuilder {
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", 5 + 2 * i)).collect();
    let mut builder = PdfBuilder::new()
        .object(1, "<< /Type /Catalog /Pages 2 0 R >>")
        .object(
            2,
            &format!(
                "<< /Type /Pages /Kids [{}] /Count {pages} /Resources 4 0 R /MediaBox [0 0 612 792] >>",
                kids.join(" ")
            ),
        )
        .object(3, "<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>")
        .object(4, "<< /Font << /F1 3 0 R >> >>");
    for i in 0..pages {
        let page = 5 + 2 * i as u32;
        builder = builder
            .object(page, &format!("<< /Type /Page /Parent 2 0 R /Contents {} 0 R >>", page + 1))
            .stream(page + 1, "", &page_text(label, i));
    }
    builder
}

pub fn simple_pdf(label: &str, pages: usize) -> Vec<u8> {
    simple_pdf_builder(label, pages).build()
}

/// Number of font dictionaries in a document
pub fn font_count(doc: &pdf_assembler::Document) -> usize {
    doc.graph()
        .iter()
        .filter(|(_, object)| object.as_dict().is_some_and(|d| d.has_type(b"Font")))
        .count()
}

/// A 2x2 opaque RGB image
pub fn tiny_rgb_image() -> pdf_assembler::pdf::RasterImage {
    pdf_assembler::pdf::RasterImage {
        data: vec![0, 0, 0, 255, 255, 255, 255, 0, 0, 0, 0, 255],
        width: 2,
        height: 2,
        format: pdf_assembler::pdf::ImageFormat::Rgb8,
        alpha: None,
    }
}
