//! The node-constructor engine (§2.2 "Constructor engine", §4.15).
//!
//! Both direct (`<a>...</a>`) and computed (`element {..} {..}`)
//! constructors build their result into the evaluator's
//! [`SyntheticArena`](crate::xpath::axis::SyntheticArena) rather than the
//! host tree — the host is read-only from this crate's point of view
//! (§6). An element constructor needs each child's `parent_id` to name
//! the element's own ID before the element's `Tag` can be finalized, so
//! construction always goes through [`SyntheticArena::reserve_id`] before
//! [`SyntheticArena::insert`] rather than the atomic `alloc` helper.
//!
//! A node-set item produced by a nested `{...}` expression is linked into
//! the new parent by ID, not deep-copied; if that item is itself a host
//! node, its own `parent_id` still names its original document parent, so
//! axes that walk upward from it (`ancestor::`, `parent::`) see the
//! source document, not the new fragment. Atomic items become one
//! `#text` child each rather than being merged into a single run with
//! adjacent atomics — both are simplifications over full XQuery sequence
//! normalization, noted in the grounding ledger.

use crate::xpath::ast::{AvtSegment, ComputedConstructor, ConstructorContent, DirectElement, DirectPi, NameSpec, QName};
use crate::xpath::eval::EvalContext;
use crate::xpath::host::{Tag, TagId, XmlHost};
use crate::xpath::value::{NodeMatch, NodeSet, XPathValue};
use crate::xpath::Error;

pub fn eval_direct_element<H: XmlHost>(ctx: &mut EvalContext<H>, el: &DirectElement) -> Result<XPathValue, Error> {
    let id = build_direct_element(ctx, el, None)?;
    let sv = ctx.string_value_of(&NodeMatch { node: id, attr: None });
    Ok(XPathValue::NodeSet(NodeSet::singleton(id, sv)))
}

fn build_direct_element<H: XmlHost>(
    ctx: &mut EvalContext<H>,
    el: &DirectElement,
    parent_id: Option<TagId>,
) -> Result<TagId, Error> {
    let id = ctx.arena.reserve_id();

    let mut attributes = vec![(el.name.to_lexical(), String::new())];
    for attr in &el.attributes {
        let mut value = String::new();
        for seg in &attr.value {
            match seg {
                AvtSegment::Literal(s) => value.push_str(s),
                AvtSegment::Expr(e) => value.push_str(&ctx.eval_expr(e)?.to_xpath_string()),
            }
        }
        attributes.push((attr.name.to_lexical(), value));
    }

    let mut children = Vec::new();
    for content in &el.content {
        match content {
            ConstructorContent::Text(s) => children.push(push_text_child(ctx, id, s.clone())),
            ConstructorContent::Element(inner) => {
                children.push(build_direct_element(ctx, inner, Some(id))?);
            }
            ConstructorContent::Expr(e) => {
                let value = ctx.eval_expr(e)?;
                append_expr_content(ctx, id, value, &mut children);
            }
        }
    }

    ctx.arena.insert(
        id,
        Tag {
            id,
            parent_id,
            namespace_id: None,
            attributes,
            children,
        },
    );
    Ok(id)
}

fn push_text_child<H: XmlHost>(ctx: &mut EvalContext<H>, parent_id: TagId, text: String) -> TagId {
    let id = ctx.arena.reserve_id();
    ctx.arena.insert(
        id,
        Tag {
            id,
            parent_id: Some(parent_id),
            namespace_id: None,
            attributes: vec![("#text".to_string(), text)],
            children: Vec::new(),
        },
    );
    id
}

/// Expand an enclosed `{...}` expression's result into `parent_id`'s
/// content: node-set items (excluding attribute matches, which have no
/// place in element content) are linked by ID, everything else becomes a
/// `#text` child of its string value.
fn append_expr_content<H: XmlHost>(ctx: &mut EvalContext<H>, parent_id: TagId, value: XPathValue, children: &mut Vec<TagId>) {
    for item in value.into_items() {
        match item {
            XPathValue::NodeSet(ns) => {
                for m in ns.matches() {
                    if m.attr.is_none() {
                        children.push(m.node);
                    }
                }
            }
            other => children.push(push_text_child(ctx, parent_id, other.to_xpath_string())),
        }
    }
}

pub fn eval_direct_pi<H: XmlHost>(ctx: &mut EvalContext<H>, pi: &DirectPi) -> Result<XPathValue, Error> {
    let content = pi.content.clone();
    let id = ctx.arena.alloc(|id| Tag {
        id,
        parent_id: None,
        namespace_id: None,
        attributes: vec![(format!("?{}", pi.target), content.clone())],
        children: Vec::new(),
    });
    Ok(XPathValue::NodeSet(NodeSet::singleton(id, content)))
}

fn resolve_name<H: XmlHost>(ctx: &mut EvalContext<H>, spec: &NameSpec) -> Result<QName, Error> {
    match spec {
        NameSpec::Literal(q) => Ok(q.clone()),
        NameSpec::Computed(e) => Ok(QName::parse(&ctx.eval_expr(e)?.to_xpath_string())),
    }
}

pub fn eval_computed<H: XmlHost>(ctx: &mut EvalContext<H>, c: &ComputedConstructor) -> Result<XPathValue, Error> {
    match c {
        ComputedConstructor::Element { name, content } => {
            let qn = resolve_name(ctx, name)?;
            let id = ctx.arena.reserve_id();
            let value = ctx.eval_expr(content)?;
            let mut attributes = vec![(qn.to_lexical(), String::new())];
            let mut children = Vec::new();
            for item in value.into_items() {
                match item {
                    XPathValue::NodeSet(ns) => {
                        for m in ns.matches() {
                            match m.attr {
                                Some(attr_name) => {
                                    let v = ctx.string_value_of(&m);
                                    attributes.push((attr_name, v));
                                }
                                None => children.push(m.node),
                            }
                        }
                    }
                    other => children.push(push_text_child(ctx, id, other.to_xpath_string())),
                }
            }
            ctx.arena.insert(
                id,
                Tag {
                    id,
                    parent_id: None,
                    namespace_id: None,
                    attributes,
                    children,
                },
            );
            let sv = ctx.string_value_of(&NodeMatch { node: id, attr: None });
            Ok(XPathValue::NodeSet(NodeSet::singleton(id, sv)))
        }
        ComputedConstructor::Attribute { name, content } => {
            let qn = resolve_name(ctx, name)?;
            let value = ctx.eval_expr(content)?.to_xpath_string();
            // A standalone `attribute {..}{..}` outside an enclosing
            // element constructor has no element to attach to; it's
            // represented as a degenerate `$attribute:<local>` synthetic
            // node carrying the value, rather than modeled as a bare
            // attribute with no owner (§9 open question, resolved here).
            let marker = format!("$attribute:{}", qn.local);
            let stored = value.clone();
            let id = ctx.arena.alloc(|id| Tag {
                id,
                parent_id: None,
                namespace_id: None,
                attributes: vec![(marker.clone(), stored.clone())],
                children: Vec::new(),
            });
            Ok(XPathValue::NodeSet(NodeSet::singleton(id, value)))
        }
        ComputedConstructor::Text(e) => {
            let s = ctx.eval_expr(e)?.to_xpath_string();
            let stored = s.clone();
            let id = ctx.arena.alloc(|id| Tag {
                id,
                parent_id: None,
                namespace_id: None,
                attributes: vec![("#text".to_string(), stored)],
                children: Vec::new(),
            });
            Ok(XPathValue::NodeSet(NodeSet::singleton(id, s)))
        }
        ComputedConstructor::Comment(e) => {
            let s = ctx.eval_expr(e)?.to_xpath_string();
            let stored = s.clone();
            let id = ctx.arena.alloc(|id| Tag {
                id,
                parent_id: None,
                namespace_id: None,
                attributes: vec![("#comment".to_string(), stored)],
                children: Vec::new(),
            });
            Ok(XPathValue::NodeSet(NodeSet::singleton(id, s)))
        }
        ComputedConstructor::ProcessingInstruction { target, content } => {
            let qn = resolve_name(ctx, target)?;
            let s = ctx.eval_expr(content)?.to_xpath_string();
            let stored = s.clone();
            let id = ctx.arena.alloc(|id| Tag {
                id,
                parent_id: None,
                namespace_id: None,
                attributes: vec![(format!("?{}", qn.local), stored)],
                children: Vec::new(),
            });
            Ok(XPathValue::NodeSet(NodeSet::singleton(id, s)))
        }
        ComputedConstructor::Document(e) => {
            let value = ctx.eval_expr(e)?;
            let id = ctx.arena.reserve_id();
            let mut children = Vec::new();
            append_expr_content(ctx, id, value, &mut children);
            ctx.arena.insert(
                id,
                Tag {
                    id,
                    parent_id: None,
                    namespace_id: None,
                    attributes: vec![("#document".to_string(), String::new())],
                    children,
                },
            );
            let sv = ctx.string_value_of(&NodeMatch { node: id, attr: None });
            Ok(XPathValue::NodeSet(NodeSet::singleton(id, sv)))
        }
    }
}
