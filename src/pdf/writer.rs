//! Writing a document back to bytes
//!
//! Only objects reachable from the catalog (and `/Info`) are written. They
//! are renumbered `1..=n` in id order, so output for a given document is
//! always the same bytes and carries no dead objects.

use std::collections::BTreeMap;
use std::io::Write;

use tracing::{debug, info, instrument, warn};

use super::document::Document;
use super::filter::flate_encode;
use crate::error::SerializeError;
use crate::object::{Object, ObjectId, StringFormat};

/// Output options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// Flate-compress unfiltered streams when that makes them smaller
    pub compress: bool,
}

/// Serialize with default options (no compression)
pub fn serialize(doc: &Document) -> Result<Vec<u8>, SerializeError> {
    serialize_with(doc, &WriteOptions::default())
}

/// Serialize the reachable part of `doc` into a complete PDF file
#[instrument(skip(doc), fields(objects = doc.graph().len()))]
pub fn serialize_with(doc: &Document, options: &WriteOptions) -> Result<Vec<u8>, SerializeError> {
    let graph = doc.graph();
    let root = doc.root();
    if !graph.contains(root) {
        return Err(SerializeError::MissingRoot(root));
    }
    let info = doc.info().filter(|id| {
        let present = graph.contains(*id);
        if !present {
            warn!(info = %id, "trailer /Info points at a missing object, dropping it");
        }
        present
    });

    let mut roots = vec![root];
    roots.extend(info);
    if let Some(&(from, to)) = graph.dangling_references(&roots).first() {
        return Err(SerializeError::DanglingReference { from, to });
    }
    let reachable = graph.reachable_from(&roots);
    debug!(
        reachable = reachable.len(),
        dropped = graph.len() - reachable.len(),
        "collected reachable objects"
    );

    let numbers: BTreeMap<ObjectId, u32> = reachable.iter().copied().zip(1..).collect();
    let renumber = |id: ObjectId| numbers.get(&id).copied();

    let mut out = Vec::new();
    let _ = writeln!(out, "%PDF-{}", doc.version());
    out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");

    let mut offsets = Vec::with_capacity(numbers.len());
    for (id, number) in &numbers {
        offsets.push(out.len());
        let Some(object) = graph.get(*id) else {
            continue;
        };
        let _ = writeln!(out, "{number} 0 obj");
        match object {
            Object::Stream(stream) => {
                let mut dict = stream.dict.clone();
                let mut content = std::borrow::Cow::Borrowed(&stream.content);
                if options.compress && stream.filters().is_empty() && !stream.content.is_empty() {
                    if let Ok(packed) = flate_encode(&stream.content) {
                        if packed.len() < stream.content.len() {
                            dict.set("Filter", Object::name("FlateDecode"));
                            content = std::borrow::Cow::Owned(packed);
                        }
                    }
                }
                dict.set("Length", content.len() as i64);
                write_object(&mut out, &Object::Dictionary(dict), &renumber);
                out.extend_from_slice(b"\nstream\n");
                out.extend_from_slice(&content);
                out.extend_from_slice(b"\nendstream");
            }
            other => write_object(&mut out, other, &renumber),
        }
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    let _ = write!(out, "xref\n0 {}\n0000000000 65535 f\r\n", offsets.len() + 1);
    for offset in &offsets {
        let _ = write!(out, "{offset:010} 00000 n\r\n");
    }

    let _ = write!(out, "trailer\n<< /Size {}", offsets.len() + 1);
    if let Some(number) = renumber(root) {
        let _ = write!(out, " /Root {number} 0 R");
    }
    if let Some(number) = info.and_then(renumber) {
        let _ = write!(out, " /Info {number} 0 R");
    }
    let _ = write!(out, " >>\nstartxref\n{xref_offset}\n%%EOF\n");

    info!(objects = offsets.len(), bytes = out.len(), "serialized document");
    Ok(out)
}

/// Format a number the way content streams and object syntax expect:
/// integers without a fraction, everything else with at most six decimals
/// and never in exponent form
pub(crate) fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    if value == value.trunc() && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let text = format!("{value:.6}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        _ => text.to_string(),
    }
}

fn write_object(out: &mut Vec<u8>, object: &Object, renumber: &impl Fn(ObjectId) -> Option<u32>) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Integer(value) => {
            let _ = write!(out, "{value}");
        }
        Object::Real(value) => out.extend_from_slice(format_number(*value).as_bytes()),
        Object::String(bytes, StringFormat::Literal) => write_literal_string(out, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            out.push(b'<');
            for b in bytes {
                let _ = write!(out, "{b:02X}");
            }
            out.push(b'>');
        }
        Object::Name(name) => write_name(out, name),
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item, renumber);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => {
            out.extend_from_slice(b"<<");
            for (key, value) in dict.iter() {
                write_name(out, key);
                out.push(b' ');
                write_object(out, value, renumber);
                out.push(b' ');
            }
            out.extend_from_slice(b">>");
        }
        // Streams are only valid as indirect objects; written by the caller
        Object::Stream(stream) => write_object(out, &Object::Dictionary(stream.dict.clone()), renumber),
        Object::Reference(id) => match renumber(*id) {
            Some(number) => {
                let _ = write!(out, "{number} 0 R");
            }
            None => out.extend_from_slice(b"null"),
        },
    }
}

fn write_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &b in name {
        let plain = (0x21..=0x7E).contains(&b) && !b"()<>[]{}/%#".contains(&b);
        if plain {
            out.push(b);
        } else {
            let _ = write!(out, "#{b:02X}");
        }
    }
}

fn write_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(b);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(b),
        }
    }
    out.push(b')');
}
