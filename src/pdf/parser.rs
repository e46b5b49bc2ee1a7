//! Document parser
//!
//! Parsing runs in two passes. The first indexes where every indirect object
//! lives, either by following the cross-reference data from `startxref` or,
//! when that is missing or broken, by scanning the buffer for `N G obj`
//! headers. The second materializes objects lazily, starting at the
//! trailer's `/Root` and `/Info` and loading each object on first reference,
//! so objects are found no matter the order they are stored in.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;

use tracing::{debug, info, instrument, warn};

use super::document::Document;
use super::filter::{decode_stream, DecodeError};
use super::lexer::{is_regular, is_whitespace, Lexer};
use crate::error::ParseError;
use crate::object::{Dictionary, Object, ObjectGraph, ObjectId, Stream};

/// How far from the start the `%PDF-` header may appear
const HEADER_SEARCH_WINDOW: usize = 1024;

/// Bytes after an object header inspected when guessing its kind during a scan
const SNIFF_WINDOW: usize = 512;

/// Parse a byte buffer into a [`Document`]
///
/// Anything that is not recognizably a PDF is rejected; corrupt input fails
/// closed with a reason code.
#[instrument(skip(data), fields(len = data.len()))]
pub fn parse(data: &[u8]) -> Result<Document, ParseError> {
    let version = read_header(data)?;
    let mut parser = Parser::new(data);

    if let Err(reason) = parser.read_xref_chain() {
        warn!(%reason, "cross-reference data unusable, scanning for objects");
        parser.scan_objects();
    }
    if !parser.trailer.contains_key(b"Root") {
        parser.scan_objects();
        parser.recover_trailer();
    }
    if parser.trailer.contains_key(b"Encrypt") {
        return Err(ParseError::Encrypted);
    }

    let root = parser
        .trailer
        .get(b"Root")
        .and_then(Object::as_reference)
        .ok_or(ParseError::NoPageTree)?;
    let info = parser
        .trailer
        .get(b"Info")
        .and_then(Object::as_reference)
        .filter(|id| parser.locate(*id).is_ok());

    let mut roots = vec![root];
    roots.extend(info);
    let graph = parser.materialize(&roots)?;

    let version = catalog_version(&graph, root)
        .filter(|catalog| version_number(catalog) > version_number(&version))
        .unwrap_or(version);

    let document = Document::from_parts(graph, root, info, version)?;
    info!(
        pages = document.page_count(),
        objects = document.graph().len(),
        scanned = parser.scanned,
        "parsed document"
    );
    Ok(document)
}

/// Parse several buffers independently; one failure does not affect others
pub fn parse_batch<B: AsRef<[u8]>>(buffers: &[B]) -> Vec<Result<Document, ParseError>> {
    buffers.iter().map(|buffer| parse(buffer.as_ref())).collect()
}

fn read_header(data: &[u8]) -> Result<String, ParseError> {
    let window = &data[..data.len().min(HEADER_SEARCH_WINDOW)];
    let start = find(window, b"%PDF-", 0).ok_or(ParseError::MalformedHeader)? + 5;
    let version: String = data[start..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| char::from(b))
        .collect();
    if version.is_empty() || !version.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(ParseError::MalformedHeader);
    }
    Ok(version)
}

fn catalog_version(graph: &ObjectGraph, root: ObjectId) -> Option<String> {
    let name = graph.get(root)?.as_dict()?.get_name(b"Version")?;
    Some(String::from_utf8_lossy(name).into_owned())
}

/// `1.7` → (1, 7) for comparisons
pub(crate) fn version_number(version: &str) -> (u32, u32) {
    let mut parts = version.split('.').map(|p| p.trim().parse().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|pos| pos + from)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|window| window == needle)
}

fn decode_error(error: DecodeError, offset: usize) -> ParseError {
    match error {
        DecodeError::Unsupported(filter) => ParseError::UnsupportedFilter(filter),
        DecodeError::Corrupt(reason) => ParseError::MalformedObject { offset, reason },
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum XrefEntry {
    Offset { offset: usize, generation: u16 },
    Compressed { stream: u32, index: usize },
}

/// Decoded object stream: bytes plus member positions
#[derive(Debug)]
struct ObjectStream {
    data: Vec<u8>,
    members: Vec<(u32, usize)>,
}

struct Parser<'a> {
    data: &'a [u8],
    xref: BTreeMap<u32, XrefEntry>,
    scan_index: BTreeMap<u32, XrefEntry>,
    scanned: bool,
    trailer: Dictionary,
    object_streams: HashMap<u32, Rc<ObjectStream>>,
    loading: HashSet<ObjectId>,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            xref: BTreeMap::new(),
            scan_index: BTreeMap::new(),
            scanned: false,
            trailer: Dictionary::new(),
            object_streams: HashMap::new(),
            loading: HashSet::new(),
        }
    }

    // -- Pass 1: indexing ---------------------------------------------------

    /// Follow `startxref` and every `/Prev` link; newer sections win
    fn read_xref_chain(&mut self) -> Result<(), String> {
        let keyword = rfind(self.data, b"startxref").ok_or("no startxref")?;
        let mut offset = Lexer::at(self.data, keyword + 9)
            .read_unsigned()
            .ok_or("startxref without offset")? as usize;

        let mut seen = HashSet::new();
        while seen.insert(offset) {
            match self.read_xref_section(offset)? {
                Some(prev) => offset = prev,
                None => break,
            }
        }

        if self.xref.is_empty() {
            return Err("cross-reference data lists no objects".into());
        }
        debug!(entries = self.xref.len(), "read cross-reference data");
        Ok(())
    }

    /// Read one xref table or xref stream, returning its `/Prev` offset
    fn read_xref_section(&mut self, offset: usize) -> Result<Option<usize>, String> {
        if offset >= self.data.len() {
            return Err(format!("xref offset {offset} beyond end of file"));
        }
        let mut lexer = Lexer::at(self.data, offset);
        let dict = if lexer.try_keyword(b"xref") {
            self.read_xref_table(&mut lexer)?;
            lexer.expect_keyword(b"trailer").map_err(|e| e.to_string())?;
            let trailer = lexer.read_dictionary(0).map_err(|e| e.to_string())?;
            if let Some(stream_offset) = trailer.get(b"XRefStm").and_then(Object::as_i64) {
                self.read_xref_stream(stream_offset as usize)?;
            }
            trailer
        } else {
            self.read_xref_stream(offset)?
        };
        self.merge_trailer(&dict);

        Ok(dict
            .get(b"Prev")
            .and_then(Object::as_i64)
            .and_then(|prev| usize::try_from(prev).ok()))
    }

    fn read_xref_table(&mut self, lexer: &mut Lexer<'_>) -> Result<(), String> {
        while let Some(first) = lexer.read_unsigned() {
            let count = lexer.read_unsigned().ok_or("bad xref subsection header")?;
            for i in 0..count {
                let offset = lexer.read_unsigned().ok_or("bad xref entry offset")?;
                let generation = lexer.read_unsigned().ok_or("bad xref entry generation")?;
                let in_use = if lexer.try_keyword(b"n") {
                    true
                } else if lexer.try_keyword(b"f") {
                    false
                } else {
                    return Err("bad xref entry type".into());
                };
                let number = first
                    .checked_add(i)
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or("object number too large")?;
                if in_use && offset > 0 {
                    self.xref.entry(number).or_insert(XrefEntry::Offset {
                        offset: offset as usize,
                        generation: u16::try_from(generation).unwrap_or(u16::MAX),
                    });
                }
            }
        }
        Ok(())
    }

    fn read_xref_stream(&mut self, offset: usize) -> Result<Dictionary, String> {
        let stream = self
            .read_indirect_at(offset, None)
            .map_err(|e| e.to_string())?;
        let stream = match stream {
            Object::Stream(stream) => stream,
            other => return Err(format!("xref offset points at a {}", other.type_name())),
        };
        if !stream.dict.has_type(b"XRef") {
            return Err("stream at xref offset is not /Type /XRef".into());
        }
        let decoded = decode_stream(&stream).map_err(|e| format!("xref stream: {e:?}"))?;

        let widths: Vec<usize> = stream
            .dict
            .get(b"W")
            .and_then(Object::as_array)
            .map(|w| w.iter().filter_map(Object::as_i64).map(|n| n.max(0) as usize).collect())
            .unwrap_or_default();
        if widths.len() != 3 || widths.iter().any(|w| *w > 8) {
            return Err("xref stream /W is not three field widths".into());
        }
        let row_len: usize = widths.iter().sum();
        if row_len == 0 {
            return Err("xref stream rows are empty".into());
        }

        let size = stream.dict.get(b"Size").and_then(Object::as_i64).unwrap_or(0);
        let index: Vec<i64> = match stream.dict.get(b"Index").and_then(Object::as_array) {
            Some(items) => items.iter().filter_map(Object::as_i64).collect(),
            None => vec![0, size],
        };

        let mut rows = decoded.chunks_exact(row_len);
        for pair in index.chunks_exact(2) {
            let (first, count) = (pair[0].max(0) as u64, pair[1].max(0) as u64);
            for i in 0..count {
                let Some(row) = rows.next() else {
                    return Err("xref stream shorter than its /Index".into());
                };
                let (kind_field, rest) = row.split_at(widths[0]);
                let (second, third) = rest.split_at(widths[1]);
                let kind = if widths[0] == 0 { 1 } else { be_number(kind_field) };
                let Ok(number) = u32::try_from(first + i) else {
                    continue;
                };
                let entry = match kind {
                    1 => XrefEntry::Offset {
                        offset: be_number(second) as usize,
                        generation: u16::try_from(be_number(third)).unwrap_or(u16::MAX),
                    },
                    2 => XrefEntry::Compressed {
                        stream: u32::try_from(be_number(second)).unwrap_or(u32::MAX),
                        index: be_number(third) as usize,
                    },
                    _ => continue,
                };
                self.xref.entry(number).or_insert(entry);
            }
        }
        Ok(stream.dict)
    }

    fn merge_trailer(&mut self, dict: &Dictionary) {
        for key in [&b"Root"[..], &b"Info"[..], &b"Encrypt"[..]] {
            if !self.trailer.contains_key(key) {
                if let Some(value) = dict.get(key) {
                    self.trailer.set(key, value.clone());
                }
            }
        }
    }

    /// Index objects by scanning for `N G obj` headers; later ones win
    fn scan_objects(&mut self) {
        if self.scanned {
            return;
        }
        self.scanned = true;

        let data = self.data;
        let mut pos = 0;
        while let Some(found) = find(data, b"obj", pos) {
            pos = found + 3;
            if data.get(found + 3).is_some_and(|&b| is_regular(b)) {
                continue;
            }
            let Some(start) = object_header_start(data, found) else {
                continue;
            };
            if let Ok(id) = Lexer::at(data, start).read_object_header() {
                self.scan_index.insert(
                    id.number,
                    XrefEntry::Offset {
                        offset: start,
                        generation: id.generation,
                    },
                );
            }
        }

        let object_streams: Vec<u32> = self
            .scan_index
            .iter()
            .filter(|(_, entry)| self.sniff(entry, b"/ObjStm"))
            .map(|(number, _)| *number)
            .collect();
        for stream_number in object_streams {
            match self.object_stream(stream_number) {
                Ok(stream) => {
                    for (index, (member, _)) in stream.members.iter().enumerate() {
                        self.scan_index
                            .entry(*member)
                            .or_insert(XrefEntry::Compressed {
                                stream: stream_number,
                                index,
                            });
                    }
                }
                Err(e) => debug!(stream = stream_number, error = %e, "skipping object stream"),
            }
        }

        info!(objects = self.scan_index.len(), "scanned buffer for objects");
    }

    /// Does the text right after an object header mention `needle`?
    fn sniff(&self, entry: &XrefEntry, needle: &[u8]) -> bool {
        match entry {
            XrefEntry::Offset { offset, .. } => {
                let end = (offset + SNIFF_WINDOW).min(self.data.len());
                find(&self.data[*offset..end], needle, 0).is_some()
            }
            XrefEntry::Compressed { .. } => false,
        }
    }

    /// Find Root and Info without usable cross-reference data
    fn recover_trailer(&mut self) {
        let mut end = self.data.len();
        while let Some(pos) = rfind(&self.data[..end], b"trailer") {
            if let Ok(dict) = Lexer::at(self.data, pos + 7).read_dictionary(0) {
                self.merge_trailer(&dict);
            }
            if self.trailer.contains_key(b"Root") {
                return;
            }
            end = pos;
        }

        let candidates: Vec<(u32, XrefEntry)> = self
            .scan_index
            .iter()
            .filter(|(_, entry)| self.sniff(entry, b"/XRef") || self.sniff(entry, b"/Catalog"))
            .map(|(number, entry)| (*number, *entry))
            .collect();
        let mut best: Option<(usize, ObjectId)> = None;
        for (number, entry) in candidates {
            let XrefEntry::Offset { offset, generation } = entry else {
                continue;
            };
            let id = ObjectId::new(number, generation);
            let Ok(object) = self.load(id) else {
                continue;
            };
            let Some(dict) = object.as_dict() else {
                continue;
            };
            if dict.has_type(b"XRef") {
                self.merge_trailer(dict);
            } else if dict.has_type(b"Catalog") && best.map_or(true, |(at, _)| offset > at) {
                best = Some((offset, id));
            }
        }
        if !self.trailer.contains_key(b"Root") {
            if let Some((_, catalog)) = best {
                warn!(catalog = %catalog, "no trailer found, using last catalog object");
                self.trailer.set("Root", catalog);
            }
        }
    }

    // -- Pass 2: materialization ---------------------------------------------

    /// Load every object reachable from `roots`, each on first reference
    fn materialize(&mut self, roots: &[ObjectId]) -> Result<ObjectGraph, ParseError> {
        let mut graph = ObjectGraph::new();
        let mut pending: Vec<ObjectId> = roots.to_vec();
        let mut refs = Vec::new();

        while let Some(id) = pending.pop() {
            if graph.contains(id) {
                continue;
            }
            let object = self.load(id)?;
            refs.clear();
            object.collect_references(&mut refs);
            pending.extend(refs.iter().filter(|r| !graph.contains(**r)));
            graph.insert_at(id, object);
        }
        Ok(graph)
    }

    fn locate(&mut self, id: ObjectId) -> Result<XrefEntry, ParseError> {
        let matches = |entry: &XrefEntry| match entry {
            XrefEntry::Offset { generation, .. } => *generation == id.generation,
            XrefEntry::Compressed { .. } => id.generation == 0,
        };
        if let Some(entry) = self.xref.get(&id.number).filter(|e| matches(*e)) {
            return Ok(*entry);
        }
        self.scan_objects();
        self.scan_index
            .get(&id.number)
            .filter(|e| matches(*e))
            .copied()
            .ok_or(ParseError::UnresolvableReference(id))
    }

    fn load(&mut self, id: ObjectId) -> Result<Object, ParseError> {
        if !self.loading.insert(id) {
            return Err(ParseError::MalformedObject {
                offset: 0,
                reason: format!("object {id} depends on itself"),
            });
        }
        let result = self.load_located(id);
        self.loading.remove(&id);
        result
    }

    fn load_located(&mut self, id: ObjectId) -> Result<Object, ParseError> {
        match self.locate(id)? {
            XrefEntry::Offset { offset, .. } => match self.read_indirect_at(offset, Some(id)) {
                Ok(object) => Ok(object),
                Err(e) if !self.scanned => {
                    debug!(object = %id, error = %e, "xref offset is stale, rescanning");
                    self.scan_objects();
                    match self.scan_index.get(&id.number) {
                        Some(XrefEntry::Offset { offset: found, .. }) if *found != offset => {
                            let found = *found;
                            self.read_indirect_at(found, Some(id))
                        }
                        Some(XrefEntry::Compressed { stream, index }) => {
                            let (stream, index) = (*stream, *index);
                            self.load_compressed(id, stream, index)
                        }
                        _ => Err(e),
                    }
                }
                Err(e) => Err(e),
            },
            XrefEntry::Compressed { stream, index } => self.load_compressed(id, stream, index),
        }
    }

    /// Parse `N G obj ... endobj` at `offset`
    fn read_indirect_at(
        &mut self,
        offset: usize,
        expected: Option<ObjectId>,
    ) -> Result<Object, ParseError> {
        if offset >= self.data.len() {
            return Err(ParseError::TruncatedObject { offset });
        }
        let mut lexer = Lexer::at(self.data, offset);
        let found = lexer.read_object_header()?;
        if let Some(expected) = expected {
            if found != expected {
                return Err(ParseError::MalformedObject {
                    offset,
                    reason: format!("expected object {expected}, found {found}"),
                });
            }
        }

        let object = lexer.read_object()?;
        let object = match object {
            Object::Dictionary(dict) if lexer.try_keyword(b"stream") => {
                Object::Stream(self.read_stream_body(&mut lexer, dict)?)
            }
            other => other,
        };
        if !lexer.try_keyword(b"endobj") {
            debug!(object = %found, "missing endobj");
        }
        Ok(object)
    }

    /// Read stream bytes after the `stream` keyword
    ///
    /// `/Length` decides the extent when it is consistent with the bytes that
    /// follow; otherwise the data runs up to `endstream`.
    fn read_stream_body(
        &mut self,
        lexer: &mut Lexer<'a>,
        dict: Dictionary,
    ) -> Result<Stream, ParseError> {
        let data = self.data;
        let mut start = lexer.pos();
        if data.get(start) == Some(&b'\r') {
            start += 1;
        }
        if data.get(start) == Some(&b'\n') {
            start += 1;
        }

        let declared = match dict.get(b"Length") {
            Some(Object::Integer(length)) => Some(*length),
            Some(Object::Reference(length_id)) => {
                self.load(*length_id).ok().as_ref().and_then(Object::as_i64)
            }
            _ => None,
        };
        let end = declared
            .and_then(|length| usize::try_from(length).ok())
            .and_then(|length| start.checked_add(length))
            .filter(|&end| end <= data.len() && Lexer::at(data, end).try_keyword(b"endstream"));

        let end = match end {
            Some(end) => end,
            None => {
                let mut end = find(data, b"endstream", start)
                    .ok_or(ParseError::TruncatedObject { offset: start })?;
                if end > start && data[end - 1] == b'\n' {
                    end -= 1;
                }
                if end > start && data[end - 1] == b'\r' {
                    end -= 1;
                }
                debug!(offset = start, "stream length recovered from endstream");
                end
            }
        };

        lexer.seek(end);
        lexer.expect_keyword(b"endstream")?;
        Ok(Stream::new(dict, data[start..end].to_vec()))
    }

    fn load_compressed(
        &mut self,
        id: ObjectId,
        stream_number: u32,
        index: usize,
    ) -> Result<Object, ParseError> {
        let stream = self.object_stream(stream_number)?;
        let offset = match stream.members.get(index) {
            Some((number, offset)) if *number == id.number => *offset,
            _ => stream
                .members
                .iter()
                .find(|(number, _)| *number == id.number)
                .map(|(_, offset)| *offset)
                .ok_or(ParseError::UnresolvableReference(id))?,
        };
        Lexer::at(&stream.data, offset).read_object()
    }

    fn object_stream(&mut self, number: u32) -> Result<Rc<ObjectStream>, ParseError> {
        if let Some(cached) = self.object_streams.get(&number) {
            return Ok(Rc::clone(cached));
        }
        let id = ObjectId::new(number, 0);
        let stream = match self.load(id)? {
            Object::Stream(stream) => stream,
            other => {
                return Err(ParseError::MalformedObject {
                    offset: 0,
                    reason: format!("object stream {id} is a {}", other.type_name()),
                })
            }
        };
        let data = decode_stream(&stream).map_err(|e| decode_error(e, 0))?;
        let count = stream.dict.get(b"N").and_then(Object::as_i64).unwrap_or(0).max(0);
        let first = stream
            .dict
            .get(b"First")
            .and_then(Object::as_i64)
            .and_then(|first| usize::try_from(first).ok())
            .unwrap_or(0);

        let mut members = Vec::new();
        let mut lexer = Lexer::new(&data);
        for _ in 0..count {
            let (Some(member), Some(offset)) = (lexer.read_unsigned(), lexer.read_unsigned())
            else {
                return Err(ParseError::MalformedObject {
                    offset: lexer.pos(),
                    reason: format!("object stream {id} has a short header"),
                });
            };
            let member = u32::try_from(member).ok();
            let start = usize::try_from(offset)
                .ok()
                .and_then(|offset| first.checked_add(offset))
                .filter(|start| *start < data.len());
            let (Some(member), Some(start)) = (member, start) else {
                return Err(ParseError::MalformedObject {
                    offset: lexer.pos(),
                    reason: format!("object stream {id} has an entry out of range"),
                });
            };
            members.push((member, start));
        }

        let stream = Rc::new(ObjectStream { data, members });
        self.object_streams.insert(number, Rc::clone(&stream));
        Ok(stream)
    }
}

fn be_number(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| acc << 8 | u64::from(b))
}

/// Start of `N G` before an `obj` keyword at `keyword`
fn object_header_start(data: &[u8], keyword: usize) -> Option<usize> {
    let skip_back = |i: &mut usize, pred: fn(u8) -> bool| -> bool {
        let start = *i;
        while *i > 0 && pred(data[*i - 1]) {
            *i -= 1;
        }
        *i < start
    };
    let mut i = keyword;
    if !skip_back(&mut i, is_whitespace)
        || !skip_back(&mut i, |b| b.is_ascii_digit())
        || !skip_back(&mut i, is_whitespace)
        || !skip_back(&mut i, |b| b.is_ascii_digit())
    {
        return None;
    }
    if i > 0 && is_regular(data[i - 1]) {
        return None;
    }
    Some(i)
}
