//! Page composition: copy selected pages from source documents into a
//! fresh destination document
//!
//! Each selected page is deep-copied together with everything it
//! references. New ids are allocated in the destination and every reference
//! inside the copied objects is rewritten to the new ids. Copies are
//! memoized per request, so an object shared by many pages of one source
//! (a font, an image) is copied once and referenced by every copied page.
//!
//! # Example
//!
//! ```no_run
//! use pdf_assembler::pdf::{merge, parse, MergeRequest, PageSelection};
//!
//! let a = parse(&std::fs::read("a.pdf")?)?;
//! let b = parse(&std::fs::read("b.pdf")?)?;
//! let merged = merge(&[
//!     MergeRequest::all(&a),
//!     MergeRequest::new(&b, PageSelection::Indices(vec![1, 0])),
//! ])?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, instrument};

use super::document::{Document, INHERITABLE_KEYS};
use super::parser::version_number;
use crate::error::{Error, MergeError};
use crate::layout::PageDimensions;
use crate::object::{Dictionary, Object, ObjectId};

/// Lowest version written for merged output
const MIN_VERSION: &str = "1.4";

/// Which pages of a source to take
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PageSelection {
    /// Every page, in file order
    #[default]
    All,
    /// Zero-based page indices, in the order given. Repeats are allowed.
    Indices(Vec<usize>),
}

impl PageSelection {
    fn resolve(&self, page_count: usize) -> Vec<usize> {
        match self {
            PageSelection::All => (0..page_count).collect(),
            PageSelection::Indices(indices) => indices.clone(),
        }
    }
}

/// Parse 1-based page ranges such as `1-3,5` or `4-2` into a selection
///
/// Ranges may run backwards; an empty string selects every page.
pub fn parse_page_ranges(ranges: &str) -> crate::Result<PageSelection> {
    let ranges = ranges.trim();
    if ranges.is_empty() || ranges.eq_ignore_ascii_case("all") {
        return Ok(PageSelection::All);
    }
    let invalid = || Error::InvalidPageRange(ranges.to_string());
    let page = |text: &str| -> crate::Result<usize> {
        match text.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n - 1),
            _ => Err(invalid()),
        }
    };

    let mut indices = Vec::new();
    for part in ranges.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (page(start)?, page(end)?);
                if start <= end {
                    indices.extend(start..=end);
                } else {
                    indices.extend((end..=start).rev());
                }
            }
            None => indices.push(page(part)?),
        }
    }
    Ok(PageSelection::Indices(indices))
}

/// One source document and the pages to take from it
#[derive(Debug, Clone)]
pub struct MergeRequest<'a> {
    pub source: &'a Document,
    pub pages: PageSelection,
}

impl<'a> MergeRequest<'a> {
    pub fn new(source: &'a Document, pages: PageSelection) -> Self {
        Self { source, pages }
    }

    pub fn all(source: &'a Document) -> Self {
        Self::new(source, PageSelection::All)
    }
}

/// Snapshot of merge progress, counted in pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Completed share in `0.0..=1.0`
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// Merge the requested pages into a new document in request order
#[instrument(skip(requests), fields(requests = requests.len()))]
pub fn merge(requests: &[MergeRequest<'_>]) -> Result<Document, MergeError> {
    let mut merge = Merge::new(requests)?;
    merge.by_ref().for_each(drop);
    merge.finish()
}

/// Page-by-page merge, yielding a [`Progress`] snapshot after every page
///
/// All requests are validated up front, so a bad page index surfaces before
/// any page is copied. Dropping the iterator early abandons the merge and
/// the partially built destination with it.
pub struct Merge<'r, 'a> {
    requests: &'r [MergeRequest<'a>],
    plans: Vec<Vec<ObjectId>>,
    compositor: Compositor,
    request: usize,
    page: usize,
    copier: Option<PageCopier>,
    progress: Progress,
}

impl<'r, 'a> Merge<'r, 'a> {
    pub fn new(requests: &'r [MergeRequest<'a>]) -> Result<Self, MergeError> {
        let plans = requests
            .iter()
            .enumerate()
            .map(|(i, request)| plan(i, request.source, &request.pages))
            .collect::<Result<Vec<_>, _>>()?;
        let total: usize = plans.iter().map(Vec::len).sum();
        if total == 0 {
            return Err(MergeError::EmptyRequest);
        }

        let mut compositor = Compositor::new();
        for request in requests {
            compositor.raise_version(request.source.version());
        }
        compositor.requests = requests.len();

        Ok(Self {
            requests,
            plans,
            compositor,
            request: 0,
            page: 0,
            copier: None,
            progress: Progress { completed: 0, total },
        })
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// The merged document; fails with `EmptyRequest` if nothing was copied
    pub fn finish(self) -> Result<Document, MergeError> {
        self.compositor.finish()
    }
}

impl Iterator for Merge<'_, '_> {
    type Item = Progress;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let plan = self.plans.get(self.request)?;
            let Some(&page_id) = plan.get(self.page) else {
                self.request += 1;
                self.page = 0;
                self.copier = None;
                continue;
            };
            let source = self.requests[self.request].source;
            let copier = self.copier.get_or_insert_with(|| PageCopier::new(source));
            self.compositor.copy_page(source, copier, page_id);
            self.page += 1;
            self.progress.completed += 1;
            return Some(self.progress);
        }
    }
}

/// Validate one request and resolve it to source page ids
fn plan(
    request: usize,
    source: &Document,
    selection: &PageSelection,
) -> Result<Vec<ObjectId>, MergeError> {
    let pages = source.page_ids();
    selection
        .resolve(pages.len())
        .into_iter()
        .map(|index| {
            pages
                .get(index)
                .copied()
                .ok_or(MergeError::PageIndexOutOfRange {
                    request,
                    index,
                    page_count: pages.len(),
                })
        })
        .collect()
}

/// Destination under construction
///
/// Sources are appended one at a time, so a caller can parse, copy, and
/// drop each source before reading the next.
pub struct Compositor {
    dest: Document,
    pages_node: ObjectId,
    kids: Vec<ObjectId>,
    requests: usize,
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compositor {
    pub fn new() -> Self {
        let (dest, pages_node) = Document::empty(MIN_VERSION);
        Self {
            dest,
            pages_node,
            kids: Vec::new(),
            requests: 0,
        }
    }

    /// Pages copied so far
    pub fn page_count(&self) -> usize {
        self.kids.len()
    }

    /// Validate and copy every selected page of one source
    ///
    /// Nothing is copied if any selected index is out of range.
    pub fn append(
        &mut self,
        source: &Document,
        selection: &PageSelection,
    ) -> Result<usize, MergeError> {
        let mut session = self.begin_source(source, selection)?;
        while self.copy_next(source, &mut session) {}
        debug!(request = self.requests - 1, pages = session.len(), "appended source pages");
        Ok(session.len())
    }

    /// Validate one source and start copying it page by page
    pub fn begin_source(
        &mut self,
        source: &Document,
        selection: &PageSelection,
    ) -> Result<SourcePlan, MergeError> {
        let pages = plan(self.requests, source, selection)?;
        self.requests += 1;
        self.raise_version(source.version());
        Ok(SourcePlan {
            pages,
            next: 0,
            copier: PageCopier::new(source),
        })
    }

    /// Copy the next page of a session; false once the session is done
    ///
    /// `source` must be the document the session was started with.
    pub fn copy_next(&mut self, source: &Document, session: &mut SourcePlan) -> bool {
        let Some(&page_id) = session.pages.get(session.next) else {
            return false;
        };
        self.copy_page(source, &mut session.copier, page_id);
        session.next += 1;
        true
    }

    fn raise_version(&mut self, version: &str) {
        if version_number(version) > version_number(self.dest.version()) {
            self.dest.set_version(version);
        }
    }

    fn copy_page(&mut self, source: &Document, copier: &mut PageCopier, page_id: ObjectId) {
        let new_page = copier.copy_page(source, &mut self.dest, page_id, self.pages_node);
        self.kids.push(new_page);
    }

    /// The finished document, with its page tree filled in
    pub fn finish(mut self) -> Result<Document, MergeError> {
        if self.kids.is_empty() {
            return Err(MergeError::EmptyRequest);
        }
        let count = self.kids.len() as i64;
        let kids: Vec<Object> = self.kids.iter().copied().map(Object::Reference).collect();
        if let Some(node) = self
            .dest
            .graph_mut()
            .get_mut(self.pages_node)
            .and_then(Object::as_dict_mut)
        {
            node.set("Kids", kids);
            node.set("Count", count);
        }
        info!(
            pages = self.kids.len(),
            objects = self.dest.graph().len(),
            version = self.dest.version(),
            "merged document"
        );
        Ok(self.dest)
    }
}

/// Pages of one source still to be copied
pub struct SourcePlan {
    pages: Vec<ObjectId>,
    next: usize,
    copier: PageCopier,
}

impl SourcePlan {
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Copy state for one request
struct PageCopier {
    /// Source id to destination id
    memo: HashMap<ObjectId, ObjectId>,
    /// Pages and intermediate nodes of the source page tree
    tree_nodes: HashSet<ObjectId>,
    copied_pages: HashSet<ObjectId>,
}

impl PageCopier {
    fn new(source: &Document) -> Self {
        Self {
            memo: HashMap::new(),
            tree_nodes: page_tree_nodes(source),
            copied_pages: HashSet::new(),
        }
    }

    /// Deep-copy one page into `dest` under `parent`, returning the new id
    fn copy_page(
        &mut self,
        source: &Document,
        dest: &mut Document,
        page_id: ObjectId,
        parent: ObjectId,
    ) -> ObjectId {
        let page = detached_page(source, page_id);
        if !self.copied_pages.insert(page_id) {
            self.forget_page_objects(source, &page);
        }

        let new_page = dest.graph_mut().allocate();
        self.memo.insert(page_id, new_page);

        let mut pending = Vec::new();
        let mut page = Object::Dictionary(page);
        self.rewrite(dest, page_id, &mut page, &mut pending);
        if let Some(dict) = page.as_dict_mut() {
            dict.set("Parent", parent);
        }
        dest.graph_mut().insert_at(new_page, page);

        let mut copied = 1usize;
        while let Some((old_id, new_id)) = pending.pop() {
            let mut object = source.graph().get(old_id).cloned().unwrap_or(Object::Null);
            if let Object::Stream(stream) = &mut object {
                stream.sync_length();
            }
            self.rewrite(dest, page_id, &mut object, &mut pending);
            dest.graph_mut().insert_at(new_id, object);
            copied += 1;
        }
        debug!(source = %page_id, dest = %new_page, objects = copied, "copied page");
        new_page
    }

    /// Drop the memo entries for a page's own contents and annotations
    ///
    /// A page taken twice gets fresh copies of these; resources stay shared
    /// with the earlier copy.
    fn forget_page_objects(&mut self, source: &Document, page: &Dictionary) {
        for key in [&b"Contents"[..], &b"Annots"[..]] {
            let Some(value) = page.get(key) else {
                continue;
            };
            if let Some(id) = value.as_reference() {
                self.memo.remove(&id);
            }
            if let Some(items) = source.graph().resolve(value).and_then(Object::as_array) {
                for id in items.iter().filter_map(Object::as_reference) {
                    self.memo.remove(&id);
                }
            }
        }
    }

    /// Point every reference in `object` at destination ids, queueing
    /// source objects not seen before
    fn rewrite(
        &mut self,
        dest: &mut Document,
        page_id: ObjectId,
        object: &mut Object,
        pending: &mut Vec<(ObjectId, ObjectId)>,
    ) {
        object.map_references(&mut |old| {
            if let Some(new) = self.memo.get(&old) {
                return Object::Reference(*new);
            }
            // Other pages and tree nodes stay behind in the source
            if old != page_id && self.tree_nodes.contains(&old) {
                return Object::Null;
            }
            let new = dest.graph_mut().allocate();
            self.memo.insert(old, new);
            pending.push((old, new));
            Object::Reference(new)
        });
    }
}

/// A page dictionary with inherited attributes filled in and no `/Parent`
fn detached_page(source: &Document, page_id: ObjectId) -> Dictionary {
    let mut page = source
        .graph()
        .get(page_id)
        .and_then(Object::as_dict)
        .cloned()
        .unwrap_or_default();
    for key in INHERITABLE_KEYS {
        if !page.contains_key(key) {
            if let Some(value) = source.inherited_attribute(page_id, key) {
                page.set(key, value.clone());
            }
        }
    }
    if !page.contains_key(b"MediaBox") {
        let media_box: Vec<Object> = PageDimensions::LETTER
            .media_box()
            .to_array()
            .iter()
            .map(|v| Object::Real(*v))
            .collect();
        page.set("MediaBox", media_box);
    }
    page.remove(b"Parent");
    page
}

/// Every page and intermediate node of a document's page tree
fn page_tree_nodes(doc: &Document) -> HashSet<ObjectId> {
    let mut nodes: HashSet<ObjectId> = doc.page_ids().into_iter().collect();
    let mut stack: Vec<ObjectId> = doc.pages_node().into_iter().collect();
    while let Some(id) = stack.pop() {
        let Some(node) = doc.graph().get(id).and_then(Object::as_dict) else {
            continue;
        };
        if !nodes.insert(id) || node.has_type(b"Page") {
            continue;
        }
        if let Some(kids) = node.get(b"Kids").and_then(Object::as_array) {
            stack.extend(kids.iter().filter_map(Object::as_reference));
        }
    }
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Dictionary, ObjectGraph, Stream};

    /// Source with one shared font and `pages` pages whose content is
    /// `(label index) Tj`
    fn source(label: &str, pages: usize) -> Document {
        let mut graph = ObjectGraph::new();
        let pages_id = graph.allocate();
        let font = graph.insert(Dictionary::from_iter([
            ("Type", Object::name("Font")),
            ("BaseFont", Object::name("Courier")),
        ]));
        let resources = graph.insert(Dictionary::from_iter([(
            "Font",
            Dictionary::from_iter([("F1", Object::Reference(font))]),
        )]));
        let mut kids = Vec::new();
        for i in 0..pages {
            let content = graph.insert(Stream::new(
                Dictionary::new(),
                format!("({label} {i}) Tj").into_bytes(),
            ));
            kids.push(Object::Reference(graph.insert(Dictionary::from_iter([
                ("Type", Object::name("Page")),
                ("Parent", Object::Reference(pages_id)),
                ("Contents", Object::Reference(content)),
            ]))));
        }
        graph.insert_at(
            pages_id,
            Dictionary::from_iter([
                ("Type", Object::name("Pages")),
                ("Count", Object::Integer(pages as i64)),
                ("Kids", Object::Array(kids)),
                ("Resources", Object::Reference(resources)),
                (
                    "MediaBox",
                    Object::Array(vec![0i64.into(), 0i64.into(), 200i64.into(), 300i64.into()]),
                ),
            ]),
        );
        let root = graph.insert(Dictionary::from_iter([
            ("Type", Object::name("Catalog")),
            ("Pages", Object::Reference(pages_id)),
        ]));
        Document::from_parts(graph, root, None, "1.3").unwrap()
    }

    fn contents(doc: &Document) -> Vec<String> {
        (0..doc.page_count())
            .map(|i| String::from_utf8(doc.page_content(i)).unwrap())
            .collect()
    }

    fn fonts(doc: &Document) -> usize {
        doc.graph()
            .iter()
            .filter(|(_, object)| object.as_dict().is_some_and(|d| d.has_type(b"Font")))
            .count()
    }

    #[test]
    fn test_merge_concatenates_in_request_order() {
        let a = source("a", 2);
        let b = source("b", 3);
        let merged = merge(&[
            MergeRequest::all(&a),
            MergeRequest::new(&b, PageSelection::Indices(vec![2, 0])),
        ])
        .unwrap();

        assert_eq!(contents(&merged), ["(a 0) Tj", "(a 1) Tj", "(b 2) Tj", "(b 0) Tj"]);
        assert_eq!(merged.version(), "1.4");
    }

    #[test]
    fn test_shared_objects_copied_once_per_request() {
        let a = source("a", 3);
        let merged = merge(&[MergeRequest::all(&a)]).unwrap();
        assert_eq!(fonts(&merged), 1);

        let twice = merge(&[MergeRequest::all(&a), MergeRequest::all(&a)]).unwrap();
        assert_eq!(fonts(&twice), 2);
    }

    #[test]
    fn test_repeated_page_is_independent() {
        let a = source("a", 1);
        let merged = merge(&[MergeRequest::new(&a, PageSelection::Indices(vec![0, 0]))]).unwrap();
        assert_eq!(merged.page_count(), 2);
        assert_ne!(merged.page_content_ids(0), merged.page_content_ids(1));
        assert_eq!(contents(&merged), ["(a 0) Tj", "(a 0) Tj"]);
        assert_ne!(merged.page_ids()[0], merged.page_ids()[1]);
    }

    #[test]
    fn test_repeated_page_shares_resources() {
        let a = source("a", 2);
        let merged =
            merge(&[MergeRequest::new(&a, PageSelection::Indices(vec![0, 1, 0]))]).unwrap();
        assert_eq!(contents(&merged), ["(a 0) Tj", "(a 1) Tj", "(a 0) Tj"]);
        assert_eq!(fonts(&merged), 1);
        assert_ne!(merged.page_content_ids(0), merged.page_content_ids(2));

        let resources = |i: usize| {
            merged
                .graph()
                .get(merged.page_ids()[i])
                .and_then(Object::as_dict)
                .and_then(|page| page.get(b"Resources"))
                .cloned()
        };
        assert_eq!(resources(0), resources(2));
    }

    #[test]
    fn test_page_tree_built_on_finish() {
        let a = source("a", 3);
        let merged = merge(&[MergeRequest::all(&a)]).unwrap();
        let node = merged
            .pages_node()
            .and_then(|id| merged.graph().get(id))
            .and_then(Object::as_dict)
            .unwrap();
        assert_eq!(node.get(b"Count").and_then(Object::as_i64), Some(3));
        let kids: Vec<ObjectId> = node
            .get(b"Kids")
            .and_then(Object::as_array)
            .unwrap()
            .iter()
            .filter_map(Object::as_reference)
            .collect();
        assert_eq!(kids, merged.page_ids());
    }

    #[test]
    fn test_inherited_attributes_materialized() {
        let a = source("a", 1);
        let merged = merge(&[MergeRequest::all(&a)]).unwrap();
        let page = merged
            .graph()
            .get(merged.page_ids()[0])
            .and_then(Object::as_dict)
            .unwrap();
        assert!(page.contains_key(b"Resources"));
        assert!(page.contains_key(b"MediaBox"));
        let media_box = merged.page_media_box(0).unwrap();
        assert_eq!((media_box.width, media_box.height), (200.0, 300.0));
        assert_eq!(
            page.get(b"Parent").and_then(Object::as_reference),
            merged.pages_node()
        );
    }

    #[test]
    fn test_out_of_range_fails_before_copying() {
        let a = source("a", 2);
        let err = merge(&[
            MergeRequest::all(&a),
            MergeRequest::new(&a, PageSelection::Indices(vec![5])),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            MergeError::PageIndexOutOfRange {
                request: 1,
                index: 5,
                page_count: 2
            }
        );
    }

    #[test]
    fn test_empty_selection_rejected() {
        let a = source("a", 2);
        let err = merge(&[MergeRequest::new(&a, PageSelection::Indices(vec![]))]).unwrap_err();
        assert_eq!(err, MergeError::EmptyRequest);
        assert_eq!(merge(&[]).unwrap_err(), MergeError::EmptyRequest);
    }

    #[test]
    fn test_progress_reports_every_page() {
        let a = source("a", 2);
        let b = source("b", 1);
        let requests = [MergeRequest::all(&a), MergeRequest::all(&b)];
        let mut merge = Merge::new(&requests).unwrap();
        let steps: Vec<Progress> = merge.by_ref().collect();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2], Progress { completed: 3, total: 3 });
        assert_eq!(steps[0].fraction(), 1.0 / 3.0);
        assert_eq!(merge.finish().unwrap().page_count(), 3);
    }

    #[test]
    fn test_compositor_append_incrementally() {
        let mut compositor = Compositor::new();
        {
            let a = source("a", 2);
            assert_eq!(compositor.append(&a, &PageSelection::All).unwrap(), 2);
        }
        let b = source("b", 1);
        let err = compositor
            .append(&b, &PageSelection::Indices(vec![3]))
            .unwrap_err();
        assert!(matches!(err, MergeError::PageIndexOutOfRange { request: 1, .. }));
        assert_eq!(compositor.page_count(), 2);

        compositor.append(&b, &PageSelection::All).unwrap();
        let doc = compositor.finish().unwrap();
        assert_eq!(contents(&doc), ["(a 0) Tj", "(a 1) Tj", "(b 0) Tj"]);
    }

    #[test]
    fn test_finish_without_pages_is_empty_request() {
        assert_eq!(Compositor::new().finish().unwrap_err(), MergeError::EmptyRequest);
    }

    #[test]
    fn test_links_to_other_pages_become_null() {
        let mut a = source("a", 2);
        let ids = a.page_ids();
        a.graph_mut()
            .get_mut(ids[0])
            .and_then(Object::as_dict_mut)
            .unwrap()
            .set("Next", ids[1]);
        let merged = merge(&[MergeRequest::new(&a, PageSelection::Indices(vec![0]))]).unwrap();
        let page = merged
            .graph()
            .get(merged.page_ids()[0])
            .and_then(Object::as_dict)
            .unwrap();
        assert_eq!(page.get(b"Next"), Some(&Object::Null));
    }

    #[test]
    fn test_parse_page_ranges() {
        assert_eq!(parse_page_ranges("").unwrap(), PageSelection::All);
        assert_eq!(
            parse_page_ranges("1-3,5").unwrap(),
            PageSelection::Indices(vec![0, 1, 2, 4])
        );
        assert_eq!(
            parse_page_ranges("3-1, 1").unwrap(),
            PageSelection::Indices(vec![2, 1, 0, 0])
        );
        assert!(matches!(parse_page_ranges("0"), Err(Error::InvalidPageRange(_))));
        assert!(parse_page_ranges("1-x").is_err());
    }

    #[test]
    fn test_version_is_highest_source_version() {
        let a = source("a", 1);
        let mut b = source("b", 1);
        b.set_version("1.7");
        let merged = merge(&[MergeRequest::all(&a), MergeRequest::all(&b)]).unwrap();
        assert_eq!(merged.version(), "1.7");
    }
}
