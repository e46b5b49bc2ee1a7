//! Typed PDF object model
//!
//! Every value in a document is an [`Object`]. Indirect objects live in an
//! [`ObjectGraph`] keyed by [`ObjectId`]; everything that points at another
//! indirect object does so through [`Object::Reference`], never by owning it.

mod graph;

pub use graph::ObjectGraph;

use indexmap::IndexMap;
use std::fmt;

/// Handle of one indirect object inside one document
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    pub number: u32,
    pub generation: u16,
}

impl ObjectId {
    pub const fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

impl From<(u32, u16)> for ObjectId {
    fn from((number, generation): (u32, u16)) -> Self {
        Self::new(number, generation)
    }
}

/// How a string was written in the source, kept so output looks the same
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StringFormat {
    #[default]
    Literal,
    Hexadecimal,
}

/// A PDF value
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Null,
    Boolean(bool),
    Integer(i64),
    Real(f64),
    String(Vec<u8>, StringFormat),
    Name(Vec<u8>),
    Array(Vec<Object>),
    Dictionary(Dictionary),
    Stream(Stream),
    Reference(ObjectId),
}

impl Object {
    pub fn name(name: &str) -> Self {
        Object::Name(name.as_bytes().to_vec())
    }

    pub fn string_literal(text: impl Into<Vec<u8>>) -> Self {
        Object::String(text.into(), StringFormat::Literal)
    }

    /// Short label used in log lines and error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "null",
            Object::Boolean(_) => "boolean",
            Object::Integer(_) => "integer",
            Object::Real(_) => "real",
            Object::String(..) => "string",
            Object::Name(_) => "name",
            Object::Array(_) => "array",
            Object::Dictionary(_) => "dictionary",
            Object::Stream(_) => "stream",
            Object::Reference(_) => "reference",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Object::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value of an integer or real
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Integer(n) => Some(*n as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    pub fn as_name(&self) -> Option<&[u8]> {
        match self {
            Object::Name(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<ObjectId> {
        match self {
            Object::Reference(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary of a dictionary or of a stream
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(&stream.dict),
            _ => None,
        }
    }

    pub fn as_dict_mut(&mut self) -> Option<&mut Dictionary> {
        match self {
            Object::Dictionary(dict) => Some(dict),
            Object::Stream(stream) => Some(&mut stream.dict),
            _ => None,
        }
    }

    pub fn as_stream(&self) -> Option<&Stream> {
        match self {
            Object::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    /// Push every id referenced anywhere inside this value
    pub fn collect_references(&self, out: &mut Vec<ObjectId>) {
        match self {
            Object::Reference(id) => out.push(*id),
            Object::Array(items) => {
                for item in items {
                    item.collect_references(out);
                }
            }
            Object::Dictionary(dict) => dict.collect_references(out),
            Object::Stream(stream) => stream.dict.collect_references(out),
            Object::Null
            | Object::Boolean(_)
            | Object::Integer(_)
            | Object::Real(_)
            | Object::String(..)
            | Object::Name(_) => {}
        }
    }

    /// Rewrite every reference inside this value in place
    pub fn map_references(&mut self, f: &mut impl FnMut(ObjectId) -> Object) {
        match self {
            Object::Reference(id) => *self = f(*id),
            Object::Array(items) => {
                for item in items {
                    item.map_references(f);
                }
            }
            Object::Dictionary(dict) => dict.map_references(f),
            Object::Stream(stream) => stream.dict.map_references(f),
            Object::Null
            | Object::Boolean(_)
            | Object::Integer(_)
            | Object::Real(_)
            | Object::String(..)
            | Object::Name(_) => {}
        }
    }
}

impl From<bool> for Object {
    fn from(value: bool) -> Self {
        Object::Boolean(value)
    }
}

impl From<i64> for Object {
    fn from(value: i64) -> Self {
        Object::Integer(value)
    }
}

impl From<f64> for Object {
    fn from(value: f64) -> Self {
        Object::Real(value)
    }
}

impl From<ObjectId> for Object {
    fn from(id: ObjectId) -> Self {
        Object::Reference(id)
    }
}

impl From<Dictionary> for Object {
    fn from(dict: Dictionary) -> Self {
        Object::Dictionary(dict)
    }
}

impl From<Stream> for Object {
    fn from(stream: Stream) -> Self {
        Object::Stream(stream)
    }
}

impl From<Vec<Object>> for Object {
    fn from(items: Vec<Object>) -> Self {
        Object::Array(items)
    }
}

/// Name-keyed map that keeps insertion order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary(IndexMap<Vec<u8>, Object>);

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &[u8]) -> Option<&Object> {
        self.0.get(key)
    }

    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        self.0.get_mut(key)
    }

    pub fn set(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Object>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Vec<u8>, &Object)> {
        self.0.iter()
    }

    pub fn get_name(&self, key: &[u8]) -> Option<&[u8]> {
        self.get(key).and_then(Object::as_name)
    }

    /// True when `/Type` equals the given name
    pub fn has_type(&self, type_name: &[u8]) -> bool {
        self.get_name(b"Type") == Some(type_name)
    }

    pub fn collect_references(&self, out: &mut Vec<ObjectId>) {
        for value in self.0.values() {
            value.collect_references(out);
        }
    }

    pub fn map_references(&mut self, f: &mut impl FnMut(ObjectId) -> Object) {
        for value in self.0.values_mut() {
            value.map_references(f);
        }
    }
}

impl<K: Into<Vec<u8>>, V: Into<Object>> FromIterator<(K, V)> for Dictionary {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Stream object: a dictionary plus raw (possibly filtered) bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    pub dict: Dictionary,
    pub content: Vec<u8>,
}

impl Stream {
    /// Build a stream whose `/Length` matches its content
    pub fn new(mut dict: Dictionary, content: Vec<u8>) -> Self {
        dict.set("Length", content.len() as i64);
        Self { dict, content }
    }

    /// Reset `/Length` to the actual content length
    pub fn sync_length(&mut self) {
        self.dict.set("Length", self.content.len() as i64);
    }

    /// Filter names applied to the content, outermost first
    pub fn filters(&self) -> Vec<Vec<u8>> {
        match self.dict.get(b"Filter") {
            Some(Object::Name(name)) => vec![name.clone()],
            Some(Object::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_name().map(<[u8]>::to_vec))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_references_nested() {
        let mut inner = Dictionary::new();
        inner.set("Font", ObjectId::new(7, 0));
        let value = Object::Array(vec![
            Object::Reference(ObjectId::new(3, 0)),
            Object::Dictionary(inner),
            Object::Integer(4),
        ]);

        let mut refs = Vec::new();
        value.collect_references(&mut refs);
        assert_eq!(refs, vec![ObjectId::new(3, 0), ObjectId::new(7, 0)]);
    }

    #[test]
    fn test_map_references_rewrites_stream_dict() {
        let mut dict = Dictionary::new();
        dict.set("SMask", ObjectId::new(2, 0));
        let mut value = Object::Stream(Stream::new(dict, b"abc".to_vec()));

        value.map_references(&mut |id| Object::Reference(ObjectId::new(id.number + 10, 0)));

        let stream = value.as_stream().unwrap();
        assert_eq!(
            stream.dict.get(b"SMask"),
            Some(&Object::Reference(ObjectId::new(12, 0)))
        );
        assert_eq!(stream.dict.get(b"Length"), Some(&Object::Integer(3)));
    }

    #[test]
    fn test_dictionary_keeps_insertion_order() {
        let mut dict = Dictionary::new();
        dict.set("Type", Object::name("Page"));
        dict.set("MediaBox", Object::Null);
        dict.set("Contents", Object::Null);
        dict.remove(b"MediaBox");

        let keys: Vec<&[u8]> = dict.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![b"Type".as_slice(), b"Contents".as_slice()]);
        assert!(dict.has_type(b"Page"));
    }

    #[test]
    fn test_stream_filters() {
        let mut dict = Dictionary::new();
        dict.set(
            "Filter",
            vec![Object::name("ASCII85Decode"), Object::name("FlateDecode")],
        );
        let stream = Stream::new(dict, Vec::new());
        assert_eq!(
            stream.filters(),
            vec![b"ASCII85Decode".to_vec(), b"FlateDecode".to_vec()]
        );
    }
}
