//! The external XML host interface (§6 "XML host").
//!
//! This crate never owns the document tree being queried — it borrows one
//! through [`XmlHost`]. A real host (the surrounding framework) provides
//! tag lookup, namespace registration/resolution, and a tree of [`Tag`]s;
//! this crate only ever reads that tree (plus the synthetic nodes it
//! builds itself for constructors and the namespace axis, kept in its own
//! arena rather than pushed into the host).

use std::collections::HashMap;

/// A unique, host-assigned tag identifier. Synthetic nodes created by the
/// constructor engine or the namespace axis use negative IDs so they
/// never collide with a host document's positive IDs (§3.2 invariants).
pub type TagId = i64;

/// One node in the XML tree: an element, attribute-bearing text node,
/// comment, or processing instruction (§3.2).
///
/// Attribute index 0 is the element name (or a synthetic-root/`#document`
/// / `$attribute` / `?target` marker); its value is empty for elements and
/// carries the text content for text/comment/PI nodes. Children are
/// ordered.
#[derive(Debug, Clone)]
pub struct Tag {
    /// This node's unique ID.
    pub id: TagId,
    /// Parent's ID, or `None` at the root.
    pub parent_id: Option<TagId>,
    /// Namespace ID this node resolves under, if any.
    pub namespace_id: Option<i64>,
    /// Ordered `(name, value)` pairs; index 0 is the synthesized
    /// "element name" slot.
    pub attributes: Vec<(String, String)>,
    /// Ordered child node IDs.
    pub children: Vec<TagId>,
}

impl Tag {
    /// The element/node name, i.e. attribute slot 0's key.
    pub fn name(&self) -> &str {
        self.attributes
            .first()
            .map(|(k, _)| k.as_str())
            .unwrap_or("")
    }

    /// Text content for text/comment/PI nodes: attribute slot 0's value.
    pub fn text_value(&self) -> &str {
        self.attributes
            .first()
            .map(|(_, v)| v.as_str())
            .unwrap_or("")
    }

    /// Whether this node is one of the synthetic kinds (`#document`,
    /// `$attribute`, `?target`-prefixed).
    pub fn is_synthetic_kind(&self) -> bool {
        matches!(self.name().as_bytes().first(), Some(b'#') | Some(b'$') | Some(b'?'))
    }

    /// Attributes excluding the element-name slot (index 0) — what the
    /// `attribute` axis produces (§4.10).
    pub fn real_attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .skip(1)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// The tree and naming services a host exposes to the evaluator (§6).
pub trait XmlHost {
    /// Look up a tag by ID.
    fn tag_by_id(&self, id: TagId) -> Option<Tag>;

    /// The document's root tag ID.
    fn root_id(&self) -> TagId;

    /// Register a namespace URI, returning its ID (assigning a new one on
    /// first sight).
    fn register_namespace(&mut self, uri: &str) -> i64;

    /// Look up a namespace URI by ID.
    fn namespace_uri(&self, id: i64) -> Option<String>;

    /// Resolve a prefix to a namespace ID, walking up from `scope_node_id`
    /// through `xmlns`/`xmlns:<prefix>` declarations.
    fn resolve_prefix(&self, prefix: &str, scope_node_id: TagId) -> Option<i64>;

    /// Document-wide variable bindings (distinct from evaluation-local
    /// `let`/`for` bindings), consulted when a variable reference misses
    /// the local scope (§4.12).
    fn document_variable(&self, _name: &str) -> Option<crate::xpath::value::XPathValue> {
        None
    }

    /// Write the document's last-error-message slot (§9 "Error return
    /// uniformity").
    fn set_error_message(&mut self, _message: String) {}

    /// Position the host's `cursor_tags`/`cursor` onto a match (§4.16
    /// `query`: "Between calls, cursor_tags and cursor on the host XML
    /// context point to the current match"). A no-op for hosts that don't
    /// track a cursor.
    fn set_cursor(&mut self, _tag_id: TagId, _attribute_name: Option<&str>) {}

    /// The document's base URI, backing `fn:base-uri`/`fn:static-base-uri`
    /// (§4.14). This crate models one flat document per host rather than
    /// per-node `xml:base` inheritance, so every node shares the same base
    /// URI. `None` for hosts that don't track one.
    fn base_uri(&self) -> Option<String> {
        None
    }

    /// The identity URI of the document itself, backing
    /// `fn:document-uri` (§4.14). Distinct from [`Self::base_uri`] in
    /// general XPath (a document can be relocated while keeping its base
    /// URI), but hosts that only track one URI may return the same value
    /// for both.
    fn document_uri(&self) -> Option<String> {
        None
    }

    /// Dereference `fn:doc($uri)`/`fn:doc-available($uri)` (§4.14) to a
    /// tag ID in another document the host knows about. `None` for hosts
    /// that don't support loading additional documents — this crate has
    /// no built-in multi-document store or resource fetcher.
    fn resolve_document(&self, _uri: &str) -> Option<TagId> {
        None
    }

    /// Resolve `fn:collection($uri?)` (§4.14) to the member nodes of a
    /// named collection (`uri: None` is the default collection). `None`
    /// for hosts that don't define collections.
    fn resolve_collection(&self, _uri: Option<&str>) -> Option<Vec<TagId>> {
        None
    }

    /// Read the resource backing `fn:unparsed-text*` (§4.14) as plain
    /// text. `None` for hosts that don't expose a text-resource loader.
    fn read_unparsed_text(&self, _uri: &str) -> Option<String> {
        None
    }
}

/// An in-memory [`XmlHost`] used by tests and small embedders: a flat
/// `TagId → Tag` map plus a namespace table.
#[derive(Debug, Default, Clone)]
pub struct InMemoryHost {
    tags: HashMap<TagId, Tag>,
    root: TagId,
    namespaces: HashMap<i64, String>,
    next_ns_id: i64,
}

impl InMemoryHost {
    /// An empty host with `root` as the (not-yet-inserted) root ID.
    pub fn new(root: TagId) -> Self {
        Self {
            tags: HashMap::new(),
            root,
            namespaces: HashMap::new(),
            next_ns_id: 1,
        }
    }

    /// Insert or replace a tag.
    pub fn insert(&mut self, tag: Tag) {
        self.tags.insert(tag.id, tag);
    }
}

impl XmlHost for InMemoryHost {
    fn tag_by_id(&self, id: TagId) -> Option<Tag> {
        self.tags.get(&id).cloned()
    }

    fn root_id(&self) -> TagId {
        self.root
    }

    fn register_namespace(&mut self, uri: &str) -> i64 {
        if let Some((&id, _)) = self.namespaces.iter().find(|(_, u)| u.as_str() == uri) {
            return id;
        }
        let id = self.next_ns_id;
        self.next_ns_id += 1;
        self.namespaces.insert(id, uri.to_string());
        id
    }

    fn namespace_uri(&self, id: i64) -> Option<String> {
        self.namespaces.get(&id).cloned()
    }

    fn resolve_prefix(&self, prefix: &str, scope_node_id: TagId) -> Option<i64> {
        if prefix == "xml" {
            return self
                .namespaces
                .iter()
                .find(|(_, u)| u.as_str() == "http://www.w3.org/XML/1998/namespace")
                .map(|(id, _)| *id);
        }
        let decl_name = if prefix.is_empty() {
            "xmlns".to_string()
        } else {
            format!("xmlns:{prefix}")
        };
        let mut cur = Some(scope_node_id);
        while let Some(id) = cur {
            let tag = self.tag_by_id(id)?;
            if let Some((_, uri)) = tag.attributes.iter().find(|(k, _)| *k == decl_name) {
                return self
                    .namespaces
                    .iter()
                    .find(|(_, u)| *u == uri)
                    .map(|(id, _)| *id);
            }
            cur = tag.parent_id;
        }
        None
    }
}

/// What a node-visit [`Callback`] returns to control traversal (§4.16,
/// §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep visiting matches.
    Continue,
    /// Stop traversal now.
    Terminate,
}

/// A polymorphic callback for `query`'s node-visit form (§4.16, §9
/// "Callback plurality"): collapses the source's native-function-pointer
/// and scripting-hook shapes into one boxed closure.
pub type Callback<'a> = Box<dyn FnMut(TagId, Option<&str>) -> CallbackAction + 'a>;
