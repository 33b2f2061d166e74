//! The axis evaluator (§2.2 "Axis evaluator", §4.10).
//!
//! Implements the thirteen XPath axes over a host-provided [`XmlHost`]
//! tree. Every axis function returns matches in *axis order* — the order
//! predicates see when numbering `position()` — not document order;
//! callers normalize into document order afterward via
//! [`normalise_node_set`] (§4.10 "Document order", §9 open question on
//! `attribute::` ordering).

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::xpath::host::{Tag, TagId, XmlHost};
use crate::xpath::value::NodeMatch;

/// Caches shared across one top-level `evaluate`/`query` call (§4.10 "ID
/// lookup cache", §9 "Axis caching"): the ancestor-path cache and the
/// document-order comparison cache. Rebuilt per evaluation boundary, per
/// §C of the expanded spec.
#[derive(Default)]
pub struct AxisCache {
    ancestor_path: HashMap<TagId, Vec<TagId>>,
    doc_order: HashMap<(TagId, TagId), Ordering>,
}

impl AxisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear both caches; called at the start of each top-level
    /// `evaluate`/`query` (§5: "rebuilt per top-level call").
    pub fn reset(&mut self) {
        self.ancestor_path.clear();
        self.doc_order.clear();
    }

    /// The path from the root down to (but excluding) `node`, closest
    /// ancestor last. Memoized.
    fn ancestor_path(&mut self, host: &impl XmlHost, node: TagId) -> Vec<TagId> {
        if let Some(p) = self.ancestor_path.get(&node) {
            return p.clone();
        }
        let mut path = Vec::new();
        let mut cur = node;
        loop {
            let Some(tag) = host.tag_by_id(cur) else { break };
            match tag.parent_id {
                Some(parent) => {
                    path.push(parent);
                    cur = parent;
                }
                None => break,
            }
        }
        path.reverse();
        self.ancestor_path.insert(node, path.clone());
        path
    }

    /// Total order over nodes by document position: walk both nodes'
    /// root paths and compare the first divergent sibling (§4.10
    /// "Document order"). Synthetic nodes (ID < 0, not in the host tree)
    /// order by raw ID, since they have no place in the host's document.
    pub fn compare(&mut self, host: &impl XmlHost, a: TagId, b: TagId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        if let Some(&o) = self.doc_order.get(&(a, b)) {
            return o;
        }
        let ordering = self.compare_uncached(host, a, b);
        self.doc_order.insert((a, b), ordering);
        self.doc_order.insert((b, a), ordering.reverse());
        ordering
    }

    fn compare_uncached(&mut self, host: &impl XmlHost, a: TagId, b: TagId) -> Ordering {
        if host.tag_by_id(a).is_none() || host.tag_by_id(b).is_none() {
            return a.cmp(&b);
        }
        let mut path_a = self.ancestor_path(host, a);
        path_a.push(a);
        let mut path_b = self.ancestor_path(host, b);
        path_b.push(b);

        // Walk both root-to-node paths together; the first index where
        // they diverge names two siblings under a common parent (or, if
        // index 0 already diverges, two separate trees).
        let mut i = 0;
        while i < path_a.len() && i < path_b.len() && path_a[i] == path_b[i] {
            i += 1;
        }
        if i == path_a.len() || i == path_b.len() {
            // One path is a prefix of the other: that node is an
            // ancestor of the other, hence precedes it.
            return path_a.len().cmp(&path_b.len());
        }
        let x = path_a[i];
        let y = path_b[i];
        let siblings = if i == 0 {
            Vec::new()
        } else {
            host.tag_by_id(path_a[i - 1]).map(|t| t.children).unwrap_or_default()
        };
        match (
            siblings.iter().position(|n| *n == x),
            siblings.iter().position(|n| *n == y),
        ) {
            (Some(ix), Some(iy)) => ix.cmp(&iy),
            _ => x.cmp(&y),
        }
    }
}

fn children_of(host: &impl XmlHost, node: TagId) -> Vec<TagId> {
    host.tag_by_id(node).map(|t| t.children).unwrap_or_default()
}

fn parent_of(host: &impl XmlHost, node: TagId) -> Option<TagId> {
    host.tag_by_id(node).and_then(|t| t.parent_id)
}

/// Preorder (depth-first, self included) traversal of `node`'s subtree.
fn preorder(host: &impl XmlHost, node: TagId, out: &mut Vec<TagId>) {
    out.push(node);
    for c in children_of(host, node) {
        preorder(host, c, out);
    }
}

fn descendants(host: &impl XmlHost, node: TagId) -> Vec<TagId> {
    let mut out = Vec::new();
    for c in children_of(host, node) {
        preorder(host, c, &mut out);
    }
    out
}

/// Plain-node matches (no attribute) from a list of IDs.
fn plain(ids: Vec<TagId>) -> Vec<NodeMatch> {
    ids.into_iter().map(|node| NodeMatch { node, attr: None }).collect()
}

/// `child::` (§4.10).
pub fn child(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    plain(children_of(host, node))
}

/// `descendant::` (§4.10).
pub fn descendant(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    plain(descendants(host, node))
}

/// `descendant-or-self::` (§4.10).
pub fn descendant_or_self(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    let mut ids = vec![node];
    ids.extend(descendants(host, node));
    plain(ids)
}

/// `parent::` (§4.10): empty at the root.
pub fn parent(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    plain(parent_of(host, node).into_iter().collect())
}

/// `ancestor::`, closest-first (§4.10 "Walk parents to root").
pub fn ancestor(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    let mut ids = Vec::new();
    let mut cur = node;
    while let Some(p) = parent_of(host, cur) {
        ids.push(p);
        cur = p;
    }
    plain(ids)
}

/// `ancestor-or-self::`: self then ancestor, closest-first.
pub fn ancestor_or_self(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    let mut ids = vec![node];
    ids.extend(ancestor(host, node).into_iter().map(|m| m.node));
    plain(ids)
}

fn sibling_index(host: &impl XmlHost, node: TagId) -> Option<(Vec<TagId>, usize)> {
    let parent = parent_of(host, node)?;
    let siblings = children_of(host, parent);
    let idx = siblings.iter().position(|&n| n == node)?;
    Some((siblings, idx))
}

/// `following-sibling::`, forward order (§4.10).
pub fn following_sibling(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    match sibling_index(host, node) {
        Some((siblings, idx)) => plain(siblings[idx + 1..].to_vec()),
        None => Vec::new(),
    }
}

/// `preceding-sibling::`, reversed — closest first (§4.10).
pub fn preceding_sibling(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    match sibling_index(host, node) {
        Some((siblings, idx)) => {
            let mut v = siblings[..idx].to_vec();
            v.reverse();
            plain(v)
        }
        None => Vec::new(),
    }
}

/// `following::`: all siblings' subtrees after self, then recursively for
/// the parent (§4.10) — forward document order, excluding descendants of
/// `node` and its ancestors.
pub fn following(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    let mut out = Vec::new();
    let mut cur = node;
    while let Some((siblings, idx)) = sibling_index(host, cur) {
        for &sib in &siblings[idx + 1..] {
            preorder(host, sib, &mut out);
        }
        cur = parent_of(host, cur).expect("sibling_index implies a parent");
    }
    plain(out)
}

/// `preceding::`: reverse document order of all preceding nodes,
/// excluding ancestors (§4.10).
pub fn preceding(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    let mut out = Vec::new();
    let mut cur = node;
    while let Some((siblings, idx)) = sibling_index(host, cur) {
        for &sib in siblings[..idx].iter().rev() {
            let mut subtree = Vec::new();
            preorder(host, sib, &mut subtree);
            subtree.reverse();
            out.extend(subtree);
        }
        cur = parent_of(host, cur).expect("sibling_index implies a parent");
    }
    plain(out)
}

/// `self::` (§4.10).
pub fn self_axis(node: TagId) -> Vec<NodeMatch> {
    vec![NodeMatch { node, attr: None }]
}

/// `attribute::` / `@`: attributes of self excluding the element-name
/// slot, producing `(self, attrib)` matches (§4.10).
pub fn attribute(host: &impl XmlHost, node: TagId) -> Vec<NodeMatch> {
    let Some(tag) = host.tag_by_id(node) else {
        return Vec::new();
    };
    tag.real_attributes()
        .map(|(name, _)| NodeMatch {
            node,
            attr: Some(name.to_string()),
        })
        .collect()
}

/// The default `xml` namespace binding, always present (§4.10).
pub const XML_NAMESPACE_URI: &str = "http://www.w3.org/XML/1998/namespace";

/// A pool that allocates synthetic [`TagId`]s and owns synthetic [`Tag`]
/// instances for the namespace axis and the constructor engine (§3.2
/// "ConstructorNamespaceScope", §9 "Synthetic nodes"). Reset once per
/// evaluation boundary so constructed/synthetic nodes from different
/// evaluations never alias.
#[derive(Default)]
pub struct SyntheticArena {
    next_id: i64,
    tags: HashMap<TagId, Tag>,
}

impl SyntheticArena {
    pub fn new() -> Self {
        Self {
            next_id: -1,
            tags: HashMap::new(),
        }
    }

    /// Allocate a fresh negative ID and store `tag` (with that ID
    /// written into `tag.id`) under it.
    pub fn alloc(&mut self, mut build: impl FnMut(TagId) -> Tag) -> TagId {
        let id = self.next_id;
        self.next_id -= 1;
        let tag = build(id);
        self.tags.insert(id, tag);
        id
    }

    pub fn get(&self, id: TagId) -> Option<&Tag> {
        self.tags.get(&id)
    }

    /// Reserve a fresh ID without storing a node under it yet, for
    /// building a node whose children must be constructed first and need
    /// to know their parent's ID in advance (the constructor engine's
    /// element case). Pair with [`Self::insert`].
    pub fn reserve_id(&mut self) -> TagId {
        let id = self.next_id;
        self.next_id -= 1;
        id
    }

    /// Store `tag` under a previously [`Self::reserve_id`]d ID.
    pub fn insert(&mut self, id: TagId, tag: Tag) {
        self.tags.insert(id, tag);
    }

    /// Drop all synthetic nodes and rewind the ID counter (§5 "Global
    /// state": reset per evaluation).
    pub fn reset(&mut self) {
        self.tags.clear();
        self.next_id = -1;
    }
}

/// `namespace::`: synthetic `(prefix → URI)` nodes walking up from self,
/// innermost declaration shadowing outer ones, `xml` always present,
/// sorted by prefix (§4.10).
///
/// This requires cooperation from the host for prefix resolution, since
/// only the host knows how `xmlns`/`xmlns:<prefix>` declarations map to
/// registered namespace IDs; this function walks the ancestor chain
/// itself (mirroring `resolve_prefix`'s own walk) so it can collect every
/// distinct prefix rather than resolving one at a time.
pub fn namespace(
    host: &impl XmlHost,
    arena: &mut SyntheticArena,
    node: TagId,
) -> Vec<NodeMatch> {
    let mut bindings: HashMap<String, String> = HashMap::new();
    bindings.insert("xml".to_string(), XML_NAMESPACE_URI.to_string());

    let mut cur = Some(node);
    while let Some(id) = cur {
        let Some(tag) = host.tag_by_id(id) else { break };
        for (name, value) in tag.real_attributes() {
            if name == "xmlns" {
                bindings.entry(String::new()).or_insert_with(|| value.to_string());
            } else if let Some(prefix) = name.strip_prefix("xmlns:") {
                bindings
                    .entry(prefix.to_string())
                    .or_insert_with(|| value.to_string());
            }
        }
        cur = tag.parent_id;
    }

    let mut prefixes: Vec<String> = bindings.keys().cloned().collect();
    prefixes.sort();
    prefixes
        .into_iter()
        .map(|prefix| {
            let uri = bindings[&prefix].clone();
            let node_id = arena.alloc(|id| Tag {
                id,
                parent_id: Some(node),
                namespace_id: None,
                attributes: vec![(prefix.clone(), uri.clone())],
                children: Vec::new(),
            });
            NodeMatch {
                node: node_id,
                attr: None,
            }
        })
        .collect()
}

/// Remove nulls, sort into document order, and deduplicate by pointer
/// identity (§3.2 invariants, §4.10 "Document order", §8 "Document
/// order": idempotent, strictly increasing).
pub fn normalise_node_set(
    host: &impl XmlHost,
    cache: &mut AxisCache,
    mut matches: Vec<NodeMatch>,
) -> Vec<NodeMatch> {
    let mut seen = std::collections::HashSet::new();
    matches.retain(|m| seen.insert((m.node, m.attr.clone())));
    matches.sort_by(|a, b| {
        let primary = cache.compare(host, a.node, b.node);
        if primary != Ordering::Equal {
            return primary;
        }
        // Same owning node: attribute slot 0 (the element itself) sorts
        // before any of its attributes; attributes otherwise keep their
        // relative insertion order (stable sort handles that).
        match (&a.attr, &b.attr) {
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            _ => Ordering::Equal,
        }
    });
    matches
}
