//! The in-memory document: object graph, root, and derived page tree

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::error::ParseError;
use crate::layout::Rect;
use crate::object::{Dictionary, Object, ObjectGraph, ObjectId, Stream};

/// Attributes a page may inherit from its ancestors in the page tree
pub(crate) const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Resources the engine adds to documents and shares across pages
#[derive(Debug, Clone, Default)]
struct SharedResources {
    font: Option<ObjectId>,
}

/// A parsed or assembled PDF document
///
/// The page tree is not stored separately; it is walked from the catalog on
/// demand, so the graph is the single source of truth.
#[derive(Debug, Clone)]
pub struct Document {
    graph: ObjectGraph,
    root: ObjectId,
    info: Option<ObjectId>,
    version: String,
    shared: SharedResources,
}

impl Document {
    /// Assemble a document from parts, checking that the page tree is sound
    pub fn from_parts(
        graph: ObjectGraph,
        root: ObjectId,
        info: Option<ObjectId>,
        version: impl Into<String>,
    ) -> Result<Self, ParseError> {
        walk_page_tree(&graph, root)?;
        Ok(Self {
            graph,
            root,
            info,
            version: version.into(),
            shared: SharedResources::default(),
        })
    }

    /// Empty document with a catalog and a page tree node with no kids
    ///
    /// Used as the destination of a merge; it has zero pages until pages are
    /// appended, which is why it skips the page tree check. Returns the
    /// document and the id of its page tree node.
    pub(crate) fn empty(version: impl Into<String>) -> (Self, ObjectId) {
        let mut graph = ObjectGraph::new();
        let pages_id = graph.insert(Dictionary::from_iter([
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(Vec::new())),
            ("Count", Object::Integer(0)),
        ]));
        let root = graph.insert(Dictionary::from_iter([
            ("Type", Object::name("Catalog")),
            ("Pages", Object::Reference(pages_id)),
        ]));
        let doc = Self {
            graph,
            root,
            info: None,
            version: version.into(),
            shared: SharedResources::default(),
        };
        (doc, pages_id)
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut ObjectGraph {
        &mut self.graph
    }

    pub fn root(&self) -> ObjectId {
        self.root
    }

    /// The `/Info` dictionary id from the trailer, if any
    pub fn info(&self) -> Option<ObjectId> {
        self.info
    }

    pub fn set_info(&mut self, info: Option<ObjectId>) {
        self.info = info;
    }

    /// PDF version string such as `1.7`
    pub fn version(&self) -> &str {
        &self.version
    }

    pub(crate) fn set_version(&mut self, version: impl Into<String>) {
        self.version = version.into();
    }

    /// Catalog's `/Pages` node
    pub(crate) fn pages_node(&self) -> Option<ObjectId> {
        self.graph
            .get(self.root)?
            .as_dict()?
            .get(b"Pages")?
            .as_reference()
    }

    /// Page ids in document order
    ///
    /// Documents are validated on construction, so a broken tree can only
    /// come from direct graph edits; such a tree yields no pages.
    pub fn page_ids(&self) -> Vec<ObjectId> {
        match walk_page_tree(&self.graph, self.root) {
            Ok(pages) => pages,
            Err(ParseError::NoPageTree) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "page tree became invalid");
                Vec::new()
            }
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids().len()
    }

    pub fn page_id(&self, index: usize) -> Option<ObjectId> {
        self.page_ids().get(index).copied()
    }

    /// Look up an inheritable page attribute, walking up `/Parent` links
    pub fn inherited_attribute(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut visited = HashSet::new();
        let mut current = page_id;
        while visited.insert(current) {
            let dict = self.graph.get(current)?.as_dict()?;
            if let Some(value) = dict.get(key) {
                return Some(value);
            }
            current = dict.get(b"Parent")?.as_reference()?;
        }
        None
    }

    /// MediaBox of a page, with inheritance resolved
    pub fn page_media_box(&self, index: usize) -> Option<Rect> {
        let page_id = self.page_id(index)?;
        let value = self.inherited_attribute(page_id, b"MediaBox")?;
        let items = self.graph.resolve(value)?.as_array()?;
        let mut numbers = items
            .iter()
            .filter_map(|item| self.graph.resolve(item).and_then(Object::as_f64));
        let (x0, y0, x1, y1) = (
            numbers.next()?,
            numbers.next()?,
            numbers.next()?,
            numbers.next()?,
        );
        Some(Rect::from_corners(x0, y0, x1, y1))
    }

    /// Ids of the content streams of a page, in drawing order
    pub fn page_content_ids(&self, index: usize) -> Vec<ObjectId> {
        let Some(page) = self.page_id(index).and_then(|id| self.graph.get(id)) else {
            return Vec::new();
        };
        let Some(contents) = page.as_dict().and_then(|dict| dict.get(b"Contents")) else {
            return Vec::new();
        };
        match contents {
            Object::Reference(id) => match self.graph.get(*id) {
                Some(Object::Array(items)) => items.iter().filter_map(Object::as_reference).collect(),
                _ => vec![*id],
            },
            Object::Array(items) => items.iter().filter_map(Object::as_reference).collect(),
            _ => Vec::new(),
        }
    }

    /// Raw bytes of each content stream of a page, in drawing order
    pub fn page_content_streams(&self, index: usize) -> Vec<&[u8]> {
        self.page_content_ids(index)
            .into_iter()
            .filter_map(|id| self.graph.get(id)?.as_stream())
            .map(|stream| stream.content.as_slice())
            .collect()
    }

    /// Concatenated raw content of a page, streams separated by newlines
    pub fn page_content(&self, index: usize) -> Vec<u8> {
        let streams = self.page_content_streams(index);
        let mut out = Vec::new();
        for (i, content) in streams.iter().enumerate() {
            if i > 0 {
                out.push(b'\n');
            }
            out.extend_from_slice(content);
        }
        out
    }

    /// The shared built-in font, created on first use
    ///
    /// Every overlay on every page draws text through this one font object.
    pub fn ensure_font(&mut self) -> ObjectId {
        if let Some(id) = self.shared.font {
            if self.graph.contains(id) {
                return id;
            }
        }
        let id = self.graph.insert(Dictionary::from_iter([
            ("Type", Object::name("Font")),
            ("Subtype", Object::name("Type1")),
            ("BaseFont", Object::name("Helvetica")),
            ("Encoding", Object::name("WinAnsiEncoding")),
        ]));
        debug!(font = %id, "added shared Helvetica font");
        self.shared.font = Some(id);
        id
    }

    /// Add a stream as a new indirect object
    pub fn add_stream(&mut self, dict: Dictionary, content: Vec<u8>) -> ObjectId {
        self.graph.insert(Stream::new(dict, content))
    }
}

/// Flatten the page tree under the catalog into page ids
///
/// A node reached twice is reported as a cycle instead of being walked
/// again.
pub(crate) fn walk_page_tree(
    graph: &ObjectGraph,
    root: ObjectId,
) -> Result<Vec<ObjectId>, ParseError> {
    let catalog = graph
        .get(root)
        .and_then(Object::as_dict)
        .ok_or(ParseError::NoPageTree)?;
    let pages_root = catalog
        .get(b"Pages")
        .and_then(Object::as_reference)
        .ok_or(ParseError::NoPageTree)?;

    let mut pages = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![pages_root];

    while let Some(node_id) = stack.pop() {
        if !visited.insert(node_id) {
            return Err(ParseError::CyclicPageTree(node_id));
        }
        let Some(node) = graph.get(node_id).and_then(Object::as_dict) else {
            warn!(node = %node_id, "page tree entry is not a dictionary, skipping");
            continue;
        };

        let is_intermediate = node.has_type(b"Pages")
            || (node.get_name(b"Type").is_none() && node.contains_key(b"Kids"));
        if !is_intermediate {
            pages.push(node_id);
            continue;
        }

        let kids = node
            .get(b"Kids")
            .and_then(|kids| graph.resolve(kids))
            .and_then(Object::as_array)
            .unwrap_or_default();
        for kid in kids.iter().rev() {
            match kid.as_reference() {
                Some(kid_id) => stack.push(kid_id),
                None => warn!(node = %node_id, "direct object in /Kids, skipping"),
            }
        }
    }

    if pages.is_empty() {
        return Err(ParseError::NoPageTree);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(parent: ObjectId) -> Object {
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::name("Page")),
            ("Parent", Object::Reference(parent)),
        ]))
    }

    fn pages_node(kids: &[ObjectId]) -> Object {
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::name("Pages")),
            (
                "Kids",
                Object::Array(kids.iter().map(|id| Object::Reference(*id)).collect()),
            ),
            ("Count", Object::Integer(kids.len() as i64)),
        ]))
    }

    /// Catalog → top (MediaBox) → [p1, mid → [p2, p3]]
    fn nested_document() -> (ObjectGraph, ObjectId, [ObjectId; 3]) {
        let mut graph = ObjectGraph::new();
        let top = graph.allocate();
        let mid = graph.allocate();
        let p1 = graph.insert(page(top));
        let p2 = graph.insert(page(mid));
        let p3 = graph.insert(page(mid));
        let mut top_node = pages_node(&[p1, mid]);
        top_node.as_dict_mut().unwrap().set(
            "MediaBox",
            vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842),
            ],
        );
        graph.insert_at(top, top_node);
        let mut mid_node = pages_node(&[p2, p3]);
        mid_node.as_dict_mut().unwrap().set("Parent", Object::Reference(top));
        graph.insert_at(mid, mid_node);
        let root = graph.insert(Dictionary::from_iter([
            ("Type", Object::name("Catalog")),
            ("Pages", Object::Reference(top)),
        ]));
        (graph, root, [p1, p2, p3])
    }

    #[test]
    fn test_walk_flattens_nested_nodes_in_order() {
        let (graph, root, pages) = nested_document();
        assert_eq!(walk_page_tree(&graph, root).unwrap(), pages.to_vec());
    }

    #[test]
    fn test_walk_detects_self_reference() {
        let mut graph = ObjectGraph::new();
        let node = graph.allocate();
        let p1 = graph.insert(page(node));
        graph.insert_at(node, pages_node(&[p1, node]));
        let root = graph.insert(Dictionary::from_iter([("Pages", Object::Reference(node))]));

        assert_eq!(
            walk_page_tree(&graph, root),
            Err(ParseError::CyclicPageTree(node))
        );
    }

    #[test]
    fn test_walk_requires_pages() {
        let mut graph = ObjectGraph::new();
        let root = graph.insert(Dictionary::from_iter([("Type", Object::name("Catalog"))]));
        assert_eq!(walk_page_tree(&graph, root), Err(ParseError::NoPageTree));
    }

    #[test]
    fn test_inherited_media_box() {
        let (graph, root, _) = nested_document();
        let doc = Document::from_parts(graph, root, None, "1.7").unwrap();
        assert_eq!(doc.page_count(), 3);
        let media_box = doc.page_media_box(2).unwrap();
        assert_eq!(media_box.width, 595.0);
        assert_eq!(media_box.height, 842.0);
    }

    #[test]
    fn test_ensure_font_is_idempotent() {
        let (mut doc, _) = Document::empty("1.4");
        let first = doc.ensure_font();
        let before = doc.graph().len();
        let second = doc.ensure_font();
        assert_eq!(first, second);
        assert_eq!(doc.graph().len(), before);
    }

    #[test]
    fn test_page_content_concatenates_streams() {
        let (mut graph, root, pages) = nested_document();
        let a = graph.insert(Stream::new(Dictionary::new(), b"0 g".to_vec()));
        let b = graph.insert(Stream::new(Dictionary::new(), b"1 g".to_vec()));
        graph
            .get_mut(pages[0])
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Contents", vec![Object::Reference(a), Object::Reference(b)]);
        let doc = Document::from_parts(graph, root, None, "1.7").unwrap();
        assert_eq!(doc.page_content(0), b"0 g\n1 g");
        assert!(doc.page_content(1).is_empty());
    }
}
