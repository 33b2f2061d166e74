//! The XPath value tagged union and node-set type (§2.2 "XPath value",
//! §3.2 "XPathValue", §9 "Node-set variance").

use crate::xpath::host::TagId;

/// A tagged union of every value an expression can evaluate to (§3.2).
#[derive(Debug, Clone)]
pub enum XPathValue {
    Boolean(bool),
    Number(f64),
    String(String),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
    NodeSet(NodeSet),
    /// A heterogeneous sequence of values — the general case a FLWOR
    /// `return` or a parenthesized list produces when its items aren't
    /// uniformly nodes (§3.2 "XPathValue"). A sequence of only nodes is
    /// always built as `NodeSet` instead, since that's what the axis and
    /// set-operator machinery expects to combine and sort.
    Sequence(Vec<XPathValue>),
}

/// One `(node, attribute?)` match produced by the axis evaluator
/// (§4.10): non-attribute axes always carry `attr: None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeMatch {
    pub node: TagId,
    pub attr: Option<String>,
}

/// A node-set result (§3.2 `XPathValue::NodeSet`, §9 "Node-set
/// variance").
///
/// Carries parallel `(nodes, attrs, string_values)` vectors of equal
/// logical length, plus an optional "first value override" that shadows
/// the string value of element 0. This isn't incidental: functions like
/// `substring-before` operate on "the node-set's string value", and when
/// a node-set is built from `@attr` matches that string value must be
/// the *attribute's* value, not the owning element's serialized text —
/// the override is how that's threaded through without a special case
/// in every string function.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    pub nodes: Vec<TagId>,
    pub attrs: Vec<Option<String>>,
    pub string_values: Vec<String>,
    pub first_value_override: Option<String>,
    /// Set by the FLWOR `return` clause (§4.13 step 7): subsequent
    /// normalization must not re-sort this node-set into document order.
    pub preserve_order: bool,
}

impl NodeSet {
    /// An empty node-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// A node-set built from axis matches, deriving each entry's string
    /// value from `string_value_of`.
    pub fn from_matches(
        matches: impl IntoIterator<Item = NodeMatch>,
        mut string_value_of: impl FnMut(&NodeMatch) -> String,
    ) -> Self {
        let mut set = NodeSet::new();
        for m in matches {
            let sv = string_value_of(&m);
            set.nodes.push(m.node);
            set.attrs.push(m.attr);
            set.string_values.push(sv);
        }
        set
    }

    /// A one-element node-set over a plain element/node match (no
    /// attribute), with a precomputed string value.
    pub fn singleton(node: TagId, string_value: String) -> Self {
        Self {
            nodes: vec![node],
            attrs: vec![None],
            string_values: vec![string_value],
            first_value_override: None,
            preserve_order: false,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn matches(&self) -> impl Iterator<Item = NodeMatch> + '_ {
        self.nodes
            .iter()
            .zip(self.attrs.iter())
            .map(|(&node, attr)| NodeMatch {
                node,
                attr: attr.clone(),
            })
    }

    /// The string value of this node-set as XPath functions see it: the
    /// override if present, else element 0's string value, else "" for
    /// an empty set (§9).
    pub fn first_string_value(&self) -> String {
        if let Some(ov) = &self.first_value_override {
            return ov.clone();
        }
        self.string_values.first().cloned().unwrap_or_default()
    }

    /// Append `other`'s entries after this set's, used by `for`-loop
    /// result concatenation and `union` (§4.12 "For expression").
    pub fn extend(&mut self, other: NodeSet) {
        self.nodes.extend(other.nodes);
        self.attrs.extend(other.attrs);
        self.string_values.extend(other.string_values);
    }

    /// Deduplicate by `(node, attribute)` identity, preserving first
    /// occurrence order (used before document-order sorting).
    pub fn dedup_by_identity(mut self) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut nodes = Vec::new();
        let mut attrs = Vec::new();
        let mut strings = Vec::new();
        for ((n, a), s) in self
            .nodes
            .drain(..)
            .zip(self.attrs.drain(..))
            .zip(self.string_values.drain(..).map(Some))
        {
            let key = (n, a.clone());
            if seen.insert(key) {
                nodes.push(n);
                attrs.push(a);
                strings.push(s.unwrap_or_default());
            }
        }
        NodeSet {
            nodes,
            attrs,
            string_values: strings,
            first_value_override: self.first_value_override,
            preserve_order: self.preserve_order,
        }
    }
}

impl XPathValue {
    /// The empty node-set, used as the "no result" value in several
    /// evaluator branches.
    pub fn empty_node_set() -> Self {
        XPathValue::NodeSet(NodeSet::new())
    }

    /// Flatten a list of per-item results into one value the way a FLWOR
    /// `return` or a parenthesized sequence literal does: zero items is
    /// the empty sequence, one item passes through unchanged, and
    /// multiple items collapse into a single `NodeSet` when every item is
    /// itself a node-set, else a generic `Sequence` (§4.13 step 7,
    /// §4.9 `Sequence`).
    pub fn concat(items: Vec<XPathValue>) -> XPathValue {
        match items.len() {
            0 => XPathValue::empty_node_set(),
            1 => items.into_iter().next().unwrap(),
            _ => {
                if items.iter().all(|v| matches!(v, XPathValue::NodeSet(_))) {
                    let mut merged = NodeSet::new();
                    for v in items {
                        if let XPathValue::NodeSet(ns) = v {
                            merged.extend(ns);
                        }
                    }
                    XPathValue::NodeSet(merged)
                } else {
                    let mut flat = Vec::with_capacity(items.len());
                    for v in items {
                        match v {
                            XPathValue::Sequence(inner) => flat.extend(inner),
                            other => flat.push(other),
                        }
                    }
                    XPathValue::Sequence(flat)
                }
            }
        }
    }

    /// This value's items, treating a non-sequence value as a singleton
    /// and a `NodeSet` as one item per node/attribute match.
    pub fn into_items(self) -> Vec<XPathValue> {
        match self {
            XPathValue::Sequence(items) => items,
            XPathValue::NodeSet(ns) => {
                if ns.is_empty() {
                    Vec::new()
                } else {
                    ns.matches()
                        .zip(ns.string_values.iter().cloned())
                        .enumerate()
                        .map(|(i, (m, sv))| {
                            let mut singleton = NodeSet::singleton(m.node, sv);
                            singleton.attrs[0] = m.attr;
                            if i == 0 {
                                singleton.first_value_override = ns.first_value_override.clone();
                            }
                            XPathValue::NodeSet(singleton)
                        })
                        .collect()
                }
            }
            other => vec![other],
        }
    }

    /// Effective boolean value (§2.2 GLOSSARY, §4.12 "Conditional",
    /// §8 "XPath boolean effective-value"): empty node-set → false;
    /// non-empty node-set → true; 0/NaN number → false; non-empty
    /// string → true; boolean passes through.
    pub fn effective_boolean_value(&self) -> bool {
        match self {
            XPathValue::Boolean(b) => *b,
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::String(s) => !s.is_empty(),
            XPathValue::Date(_) | XPathValue::Time(_) | XPathValue::DateTime(_) => true,
            XPathValue::NodeSet(ns) => !ns.is_empty(),
            XPathValue::Sequence(items) => {
                items.first().map(XPathValue::effective_boolean_value).unwrap_or(false)
            }
        }
    }

    /// Coerce to a number the way `number()` does: booleans become 1/0,
    /// strings parse (NaN on failure), node-sets use their string value.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => s.trim().parse().unwrap_or(f64::NAN),
            XPathValue::NodeSet(ns) => ns.first_string_value().trim().parse().unwrap_or(f64::NAN),
            XPathValue::Date(_) | XPathValue::Time(_) | XPathValue::DateTime(_) => f64::NAN,
            XPathValue::Sequence(items) => items.first().map(XPathValue::to_number).unwrap_or(f64::NAN),
        }
    }

    /// Coerce to a string the way `string()` does.
    pub fn to_xpath_string(&self) -> String {
        match self {
            XPathValue::Boolean(b) => b.to_string(),
            XPathValue::Number(n) => format_number(*n),
            XPathValue::String(s) => s.clone(),
            XPathValue::NodeSet(ns) => ns.first_string_value(),
            XPathValue::Date(d) => d.format("%Y-%m-%d").to_string(),
            XPathValue::Time(t) => t.format("%H:%M:%S").to_string(),
            XPathValue::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
            XPathValue::Sequence(items) => items.first().map(XPathValue::to_xpath_string).unwrap_or_default(),
        }
    }

    /// Whether this value is a node-set (used by several evaluator
    /// branches that only make sense over node-sets, e.g. filters).
    pub fn as_node_set(&self) -> Option<&NodeSet> {
        match self {
            XPathValue::NodeSet(ns) => Some(ns),
            _ => None,
        }
    }

    pub fn into_node_set(self) -> Option<NodeSet> {
        match self {
            XPathValue::NodeSet(ns) => Some(ns),
            _ => None,
        }
    }
}

/// Format a number the way XPath's `string(number)` does: integral
/// values print without a decimal point, `NaN`/`Infinity` print their
/// XPath spellings.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() };
    }
    if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        let s = format!("{n}");
        s
    }
}
