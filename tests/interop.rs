//! Cross-checks against lopdf as an independent reader and writer

mod common;

use chrono::NaiveDate;
use lopdf::{dictionary, Object, Stream};
use pdf_assembler::pdf::{
    apply_stamp, merge, parse, serialize, serialize_with, MergeRequest, SignatureStamp,
    WriteOptions,
};

use common::{page_text, simple_pdf, tiny_rgb_image};

/// Two-page document written by lopdf, with an inherited MediaBox and a
/// shared font
fn lopdf_document() -> Vec<u8> {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for i in 0..2 {
        let content = format!("BT /F1 24 Tf 100 600 Td (lopdf page {i}) Tj ET");
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => Object::Integer(2),
        "Resources" => resources_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Integer(595),
            Object::Integer(842),
        ],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("lopdf failed to write");
    bytes
}

#[test]
fn test_reads_lopdf_output() {
    let doc = parse(&lopdf_document()).unwrap();
    assert_eq!(doc.page_count(), 2);
    assert_eq!(doc.page_content(1), b"BT /F1 24 Tf 100 600 Td (lopdf page 1) Tj ET");
    let media_box = doc.page_media_box(0).unwrap();
    assert_eq!((media_box.width, media_box.height), (595.0, 842.0));
}

#[test]
fn test_lopdf_reads_our_output() {
    let doc = parse(&simple_pdf("a", 3)).unwrap();
    let bytes = serialize(&doc).unwrap();

    let loaded = lopdf::Document::load_mem(&bytes).expect("lopdf rejected our output");
    let pages = loaded.get_pages();
    assert_eq!(pages.len(), 3);
    let third = pages[&3];
    assert_eq!(loaded.get_page_content(third).unwrap(), page_text("a", 2));
}

#[test]
fn test_lopdf_reads_compressed_output() {
    let doc = parse(&simple_pdf("a", 2)).unwrap();
    let bytes = serialize_with(&doc, &WriteOptions { compress: true }).unwrap();

    let loaded = lopdf::Document::load_mem(&bytes).expect("lopdf rejected our output");
    let pages = loaded.get_pages();
    assert_eq!(loaded.get_page_content(pages[&1]).unwrap(), page_text("a", 0));
}

#[test]
fn test_merged_and_stamped_output_is_readable() {
    let ours = parse(&simple_pdf("a", 2)).unwrap();
    let theirs = parse(&lopdf_document()).unwrap();
    let mut merged = merge(&[MergeRequest::all(&theirs), MergeRequest::all(&ours)]).unwrap();
    let stamp = SignatureStamp::new(
        "Jane Doe",
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap(),
        tiny_rgb_image(),
    );
    apply_stamp(&mut merged, 3, &stamp).unwrap();
    let bytes = serialize(&merged).unwrap();

    let loaded = lopdf::Document::load_mem(&bytes).expect("lopdf rejected merged output");
    let pages = loaded.get_pages();
    assert_eq!(pages.len(), 4);

    let first = String::from_utf8_lossy(&loaded.get_page_content(pages[&1]).unwrap()).into_owned();
    assert!(first.contains("(lopdf page 0) Tj"));
    let last = String::from_utf8_lossy(&loaded.get_page_content(pages[&4]).unwrap()).into_owned();
    assert!(last.contains("(a page 1) Tj"));
    assert!(last.contains("(Digitally signed by: Jane Doe) Tj"));
}
