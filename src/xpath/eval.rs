//! The expression evaluator (§2.2 "Evaluator", §4.12) and the public
//! `compile`/`evaluate`/`query` entry points (§4.16).
//!
//! Context (the current node/position/size, and variable bindings) lives
//! on [`EvalContext`] and is pushed/popped through RAII guards rather than
//! paired push/pop calls, so a bail-out via `?` can never leave stale
//! context behind (§9 "Context stack": "reimplement as explicit scope
//! guards so each push has a deterministic pop on all exit paths").

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::xpath::ast::*;
use crate::xpath::axis::{self, AxisCache, SyntheticArena};
use crate::xpath::constructor;
use crate::xpath::flwor;
use crate::xpath::functions;
use crate::xpath::host::{CallbackAction, Callback, Tag, TagId, XmlHost};
use crate::xpath::parser::{self, CompiledQuery};
use crate::xpath::schema::SchemaRegistry;
use crate::xpath::value::{NodeMatch, NodeSet, XPathValue};
use crate::xpath::Error;

/// Evaluator-wide knobs (§B.2 of the expanded spec): whether `trace()`/
/// internal diagnostic events are emitted at `trace` level (quiet by
/// default) or promoted to `info` so they show up without raising the
/// ambient log level.
#[derive(Debug, Clone, Copy)]
pub struct EvaluatorConfig {
    pub trace_enabled: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self { trace_enabled: false }
    }
}

impl EvaluatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(mut self, enabled: bool) -> Self {
        self.trace_enabled = enabled;
        self
    }
}

/// The current `(context node, context attribute, position, size)` a
/// relative step/predicate/`.`/`position()`/`last()` sees (§4.12).
#[derive(Debug, Clone)]
pub struct ContextFrame {
    pub node: Option<TagId>,
    pub attr: Option<String>,
    pub position: usize,
    pub size: usize,
}

impl ContextFrame {
    fn root() -> Self {
        Self {
            node: None,
            attr: None,
            position: 1,
            size: 1,
        }
    }
}

/// Evaluation state threaded through one `evaluate`/`query` call: the
/// borrowed host tree, the axis document-order cache, the synthetic-node
/// arena backing constructors and the namespace axis, the variable scope
/// stack, and the current context frame.
pub struct EvalContext<'a, H: XmlHost> {
    host: &'a mut H,
    pub cache: AxisCache,
    pub arena: SyntheticArena,
    pub config: EvaluatorConfig,
    pub schema: SchemaRegistry,
    scopes: Vec<HashMap<String, XPathValue>>,
    pub frame: ContextFrame,
}

impl<'a, H: XmlHost> EvalContext<'a, H> {
    pub fn new(host: &'a mut H, config: EvaluatorConfig) -> Self {
        let root = host.root_id();
        Self {
            host,
            cache: AxisCache::new(),
            arena: SyntheticArena::new(),
            config,
            schema: SchemaRegistry::new(),
            scopes: vec![HashMap::new()],
            frame: ContextFrame {
                node: Some(root),
                attr: None,
                position: 1,
                size: 1,
            },
        }
    }

    fn lookup_var(&self, name: &str) -> Option<XPathValue> {
        for scope in self.scopes.iter().rev() {
            if let Some(v) = scope.get(name) {
                return Some(v.clone());
            }
        }
        self.host.document_variable(name)
    }

    /// Push a fresh variable scope, returning a guard that pops it on
    /// drop (§9 "Context stack").
    pub fn push_scope(&mut self, vars: HashMap<String, XPathValue>) -> ScopeGuard<'_, 'a, H> {
        self.scopes.push(vars);
        ScopeGuard { ctx: self }
    }

    /// Run `body` with the context frame temporarily set to `frame`,
    /// restoring the previous frame afterward regardless of how `body`
    /// returns (§9 "Context stack").
    pub fn with_frame<T>(&mut self, frame: ContextFrame, body: impl FnOnce(&mut Self) -> T) -> T {
        let saved = std::mem::replace(&mut self.frame, frame);
        let result = body(self);
        self.frame = saved;
        result
    }

    pub fn tag(&self, id: TagId) -> Option<Tag> {
        XmlHost::tag_by_id(self, id)
    }

    /// Emit a trace/diagnostic event, honoring [`EvaluatorConfig`]'s
    /// level mapping (§B.2).
    pub fn trace_event(&self, message: &str) {
        if self.config.trace_enabled {
            tracing::info!(target: "arcquery::xpath", "{message}");
        } else {
            tracing::trace!(target: "arcquery::xpath", "{message}");
        }
    }

    // ---- expression evaluation ----

    pub fn eval_expr(&mut self, expr: &Expr) -> Result<XPathValue, Error> {
        match expr {
            Expr::Number(n) => Ok(XPathValue::Number(*n)),
            Expr::Str(s) => Ok(XPathValue::String(s.clone())),
            Expr::VariableRef(name) => self
                .lookup_var(name)
                .ok_or_else(|| Error::failed(format!("undefined variable ${name}"))),
            Expr::Path(path) => self.eval_path(path),
            Expr::Filter { base, predicates } => {
                let value = self.eval_expr(base)?;
                self.apply_predicates(value, predicates)
            }
            Expr::And(l, r) => {
                let lv = self.eval_expr(l)?.effective_boolean_value();
                if !lv {
                    return Ok(XPathValue::Boolean(false));
                }
                Ok(XPathValue::Boolean(self.eval_expr(r)?.effective_boolean_value()))
            }
            Expr::Or(l, r) => {
                let lv = self.eval_expr(l)?.effective_boolean_value();
                if lv {
                    return Ok(XPathValue::Boolean(true));
                }
                Ok(XPathValue::Boolean(self.eval_expr(r)?.effective_boolean_value()))
            }
            Expr::Binary { op, lhs, rhs } => self.eval_binary(*op, lhs, rhs),
            Expr::SetOp { op, lhs, rhs } => self.eval_set_op(*op, lhs, rhs),
            Expr::Neg(e) => Ok(XPathValue::Number(-self.eval_expr(e)?.to_number())),
            Expr::Not(e) => Ok(XPathValue::Boolean(!self.eval_expr(e)?.effective_boolean_value())),
            Expr::FunctionCall { name, args } => functions::call(self, name, args),
            Expr::If { cond, then_branch, else_branch } => {
                if self.eval_expr(cond)?.effective_boolean_value() {
                    self.eval_expr(then_branch)
                } else {
                    self.eval_expr(else_branch)
                }
            }
            Expr::Quantified { kind, bindings, satisfies } => self.eval_quantified(*kind, bindings, satisfies),
            Expr::Flwor(f) => flwor::run(self, f),
            Expr::DirectElement(el) => constructor::eval_direct_element(self, el),
            Expr::DirectPi(pi) => constructor::eval_direct_pi(self, pi),
            Expr::Computed(c) => constructor::eval_computed(self, c),
            Expr::Sequence(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval_expr(item)?);
                }
                Ok(XPathValue::concat(values))
            }
        }
    }

    fn eval_quantified(&mut self, kind: QuantKind, bindings: &[Binding], satisfies: &Expr) -> Result<XPathValue, Error> {
        fn recurse<H: XmlHost>(
            ctx: &mut EvalContext<H>,
            bindings: &[Binding],
            satisfies: &Expr,
            kind: QuantKind,
        ) -> Result<bool, Error> {
            let Some((first, rest)) = bindings.split_first() else {
                return Ok(ctx.eval_expr(satisfies)?.effective_boolean_value());
            };
            let source = ctx.eval_expr(&first.expr)?;
            for item in source.into_items() {
                let mut vars = HashMap::new();
                vars.insert(first.var.clone(), item);
                let mut guard = ctx.push_scope(vars);
                let satisfied = recurse(&mut guard, rest, satisfies, kind)?;
                drop(guard);
                match kind {
                    QuantKind::Some if satisfied => return Ok(true),
                    QuantKind::Every if !satisfied => return Ok(false),
                    _ => {}
                }
            }
            Ok(matches!(kind, QuantKind::Every))
        }
        Ok(XPathValue::Boolean(recurse(self, bindings, satisfies, kind)?))
    }

    fn eval_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<XPathValue, Error> {
        use crate::xpath::schema::{compare_xpath_values, CompareOp};
        let l = self.eval_expr(lhs)?;
        let r = self.eval_expr(rhs)?;
        let arith = |f: fn(f64, f64) -> f64| Ok(XPathValue::Number(f(l.to_number(), r.to_number())));
        match op {
            BinOp::Add => arith(|a, b| a + b),
            BinOp::Sub => arith(|a, b| a - b),
            BinOp::Mul => arith(|a, b| a * b),
            BinOp::Div => arith(|a, b| a / b),
            BinOp::Mod => arith(|a, b| a % b),
            BinOp::ValueEq => Ok(XPathValue::Boolean(compare_xpath_values(&l, &r, CompareOp::Eq))),
            BinOp::ValueNe => Ok(XPathValue::Boolean(compare_xpath_values(&l, &r, CompareOp::Ne))),
            BinOp::ValueLt => Ok(XPathValue::Boolean(compare_xpath_values(&l, &r, CompareOp::Lt))),
            BinOp::ValueLe => Ok(XPathValue::Boolean(compare_xpath_values(&l, &r, CompareOp::Le))),
            BinOp::ValueGt => Ok(XPathValue::Boolean(compare_xpath_values(&l, &r, CompareOp::Gt))),
            BinOp::ValueGe => Ok(XPathValue::Boolean(compare_xpath_values(&l, &r, CompareOp::Ge))),
            BinOp::GeneralEq
            | BinOp::GeneralNe
            | BinOp::GeneralLt
            | BinOp::GeneralLe
            | BinOp::GeneralGt
            | BinOp::GeneralGe => {
                let cmp_op = match op {
                    BinOp::GeneralEq => CompareOp::Eq,
                    BinOp::GeneralNe => CompareOp::Ne,
                    BinOp::GeneralLt => CompareOp::Lt,
                    BinOp::GeneralLe => CompareOp::Le,
                    BinOp::GeneralGt => CompareOp::Gt,
                    _ => CompareOp::Ge,
                };
                Ok(XPathValue::Boolean(self.general_compare(&l, &r, cmp_op)))
            }
        }
    }

    /// A general comparison (`=`, `!=`, `<`, ...) holds if *any* pair of
    /// items from the (possibly multi-valued) operands satisfies it
    /// (§4.12 "General comparisons": existential semantics over the
    /// cross product).
    fn general_compare(&self, lhs: &XPathValue, rhs: &XPathValue, op: crate::xpath::schema::CompareOp) -> bool {
        use crate::xpath::schema::compare_xpath_values;
        let lefts = lhs.clone().into_items();
        let rights = rhs.clone().into_items();
        lefts
            .iter()
            .any(|l| rights.iter().any(|r| compare_xpath_values(l, r, op)))
    }

    fn eval_set_op(&mut self, op: SetOp, lhs: &Expr, rhs: &Expr) -> Result<XPathValue, Error> {
        let l = self.eval_expr(lhs)?.into_node_set().unwrap_or_default();
        let r = self.eval_expr(rhs)?.into_node_set().unwrap_or_default();
        let r_keys: std::collections::HashSet<_> = r.matches().map(|m| (m.node, m.attr)).collect();
        let combined: Vec<NodeMatch> = match op {
            SetOp::Union => l.matches().chain(r.matches()).collect(),
            SetOp::Intersect => l
                .matches()
                .filter(|m| r_keys.contains(&(m.node, m.attr.clone())))
                .collect(),
            SetOp::Except => l
                .matches()
                .filter(|m| !r_keys.contains(&(m.node, m.attr.clone())))
                .collect(),
        };
        let mut cache = std::mem::take(&mut self.cache);
        let result = axis::normalise_node_set(self, &mut cache, combined);
        self.cache = cache;
        Ok(XPathValue::NodeSet(NodeSet::from_matches(result, |m| {
            self.string_value_of(m)
        })))
    }

    // ---- path / step evaluation ----

    fn eval_path(&mut self, path: &PathExpr) -> Result<XPathValue, Error> {
        let mut current: Vec<NodeMatch> = if let Some(base) = &path.base {
            let v = self.eval_expr(base)?;
            v.into_node_set().map(|ns| ns.matches().collect()).unwrap_or_default()
        } else if path.rooted {
            vec![NodeMatch {
                node: self.host.root_id(),
                attr: None,
            }]
        } else {
            match self.frame.node {
                Some(n) => vec![NodeMatch {
                    node: n,
                    attr: self.frame.attr.clone(),
                }],
                None => Vec::new(),
            }
        };

        for step in &path.steps {
            current = self.eval_step(step, current)?;
        }

        let mut cache = std::mem::take(&mut self.cache);
        let matches = axis::normalise_node_set(self, &mut cache, current);
        self.cache = cache;
        let set = NodeSet::from_matches(matches, |m| self.string_value_of(m));
        Ok(XPathValue::NodeSet(set))
    }

    /// Evaluate one step over every node the previous step produced.
    /// Predicates are applied separately *for each originating context
    /// node* (so `position()`/`last()` inside `[...]` number the axis
    /// result relative to that one node, per §4.10), then the per-node
    /// results are concatenated.
    fn eval_step(&mut self, step: &Step, input: Vec<NodeMatch>) -> Result<Vec<NodeMatch>, Error> {
        let mut result = Vec::new();
        for m in &input {
            if m.attr.is_some() {
                // attribute nodes have no further axis of their own.
                continue;
            }
            let axis_matches = match step.axis {
                Axis::Child => axis::child(self, m.node),
                Axis::Descendant => axis::descendant(self, m.node),
                Axis::DescendantOrSelf => axis::descendant_or_self(self, m.node),
                Axis::Parent => axis::parent(self, m.node),
                Axis::Ancestor => axis::ancestor(self, m.node),
                Axis::AncestorOrSelf => axis::ancestor_or_self(self, m.node),
                Axis::FollowingSibling => axis::following_sibling(self, m.node),
                Axis::PrecedingSibling => axis::preceding_sibling(self, m.node),
                Axis::Following => axis::following(self, m.node),
                Axis::Preceding => axis::preceding(self, m.node),
                Axis::SelfAxis => axis::self_axis(m.node),
                Axis::Attribute => axis::attribute(self, m.node),
                Axis::Namespace => {
                    let mut arena = std::mem::take(&mut self.arena);
                    let result = axis::namespace(self, &mut arena, m.node);
                    self.arena = arena;
                    result
                }
            };
            let tested: Vec<NodeMatch> = axis_matches
                .into_iter()
                .filter(|cand| self.node_test_matches(&step.test, cand))
                .collect();
            let filtered = self.apply_step_predicates(tested, &step.predicates)?;
            result.extend(filtered);
        }
        Ok(result)
    }

    fn node_test_matches(&self, test: &NodeTest, m: &NodeMatch) -> bool {
        match test {
            NodeTest::Wildcard => true,
            NodeTest::Node => true,
            NodeTest::Name(qn) => {
                let Some(tag) = self.tag(m.node) else { return false };
                let name = if let Some(attr) = &m.attr {
                    attr.clone()
                } else {
                    tag.name().to_string()
                };
                name == qn.to_lexical() || name == qn.local
            }
            NodeTest::Text => self.tag(m.node).map(|t| t.name() == "#text").unwrap_or(false),
            NodeTest::Comment => self.tag(m.node).map(|t| t.name() == "#comment").unwrap_or(false),
            NodeTest::ProcessingInstruction(target) => {
                let Some(tag) = self.tag(m.node) else { return false };
                let Some(pi_target) = tag.name().strip_prefix('?') else { return false };
                target.as_deref().map(|t| t == pi_target).unwrap_or(true)
            }
        }
    }

    fn apply_step_predicates(&mut self, matches: Vec<NodeMatch>, predicates: &[Expr]) -> Result<Vec<NodeMatch>, Error> {
        let mut current = matches;
        for pred in predicates {
            current = self.filter_by_predicate(current, pred)?;
        }
        Ok(current)
    }

    /// Apply `[Predicate]` filtering to a node-set value: a numeric
    /// predicate result keeps the item at that 1-based position, anything
    /// else is the item's effective boolean value (§4.12 "Predicate
    /// application").
    fn apply_predicates(&mut self, value: XPathValue, predicates: &[Expr]) -> Result<XPathValue, Error> {
        let Some(ns) = value.as_node_set() else {
            // non-node-set filtering: treat as a one-element sequence.
            for pred in predicates {
                let keep = self.eval_predicate_keep(&value, 1, 1, pred)?;
                if !keep {
                    return Ok(XPathValue::empty_node_set());
                }
            }
            return Ok(value);
        };
        let matches: Vec<NodeMatch> = ns.matches().collect();
        let result = self.filter_by_predicates(matches, predicates)?;
        Ok(XPathValue::NodeSet(NodeSet::from_matches(result, |m| self.string_value_of(m))))
    }

    fn filter_by_predicate(&mut self, matches: Vec<NodeMatch>, pred: &Expr) -> Result<Vec<NodeMatch>, Error> {
        let size = matches.len();
        let mut kept = Vec::new();
        for (i, m) in matches.into_iter().enumerate() {
            let frame = ContextFrame {
                node: Some(m.node),
                attr: m.attr.clone(),
                position: i + 1,
                size,
            };
            let keep = self.with_frame(frame, |ctx| ctx.eval_expr(pred))?;
            if predicate_keeps(&keep, i + 1) {
                kept.push(m);
            }
        }
        Ok(kept)
    }

    fn filter_by_predicates(&mut self, mut matches: Vec<NodeMatch>, predicates: &[Expr]) -> Result<Vec<NodeMatch>, Error> {
        for pred in predicates {
            matches = self.filter_by_predicate(matches, pred)?;
        }
        Ok(matches)
    }

    fn eval_predicate_keep(&mut self, value: &XPathValue, position: usize, size: usize, pred: &Expr) -> Result<bool, Error> {
        let frame = ContextFrame {
            node: self.frame.node,
            attr: self.frame.attr.clone(),
            position,
            size,
        };
        let _ = value;
        let result = self.with_frame(frame, |ctx| ctx.eval_expr(pred))?;
        Ok(predicate_keeps(&result, position))
    }

    /// The string value of a node/attribute match, per §3.2: an
    /// attribute's is its value; an element's is the concatenation of all
    /// descendant text; a text/comment/PI node's is its own content.
    pub fn string_value_of(&self, m: &NodeMatch) -> String {
        if let Some(attr_name) = &m.attr {
            return self
                .tag(m.node)
                .and_then(|t| t.real_attributes().find(|(k, _)| k == attr_name).map(|(_, v)| v.to_string()))
                .unwrap_or_default();
        }
        let Some(tag) = self.tag(m.node) else { return String::new() };
        if matches!(tag.name(), "#text" | "#comment") || tag.name().starts_with('?') {
            return tag.text_value().to_string();
        }
        let mut out = String::new();
        self.collect_text(m.node, &mut out);
        out
    }

    fn collect_text(&self, node: TagId, out: &mut String) {
        let Some(tag) = self.tag(node) else { return };
        if matches!(tag.name(), "#text") {
            out.push_str(tag.text_value());
            return;
        }
        if matches!(tag.name(), "#comment") || tag.name().starts_with('?') {
            return;
        }
        for child in &tag.children {
            self.collect_text(*child, out);
        }
    }
}

fn predicate_keeps(result: &XPathValue, position: usize) -> bool {
    match result {
        XPathValue::Number(n) => *n == position as f64,
        other => other.effective_boolean_value(),
    }
}

impl<H: XmlHost> XmlHost for EvalContext<'_, H> {
    fn tag_by_id(&self, id: TagId) -> Option<Tag> {
        if id < 0 {
            self.arena.get(id).cloned()
        } else {
            self.host.tag_by_id(id)
        }
    }

    fn root_id(&self) -> TagId {
        self.host.root_id()
    }

    fn register_namespace(&mut self, uri: &str) -> i64 {
        self.host.register_namespace(uri)
    }

    fn namespace_uri(&self, id: i64) -> Option<String> {
        self.host.namespace_uri(id)
    }

    fn resolve_prefix(&self, prefix: &str, scope_node_id: TagId) -> Option<i64> {
        self.host.resolve_prefix(prefix, scope_node_id)
    }

    fn document_variable(&self, name: &str) -> Option<XPathValue> {
        self.host.document_variable(name)
    }

    fn set_error_message(&mut self, message: String) {
        self.host.set_error_message(message)
    }

    fn base_uri(&self) -> Option<String> {
        self.host.base_uri()
    }

    fn document_uri(&self) -> Option<String> {
        self.host.document_uri()
    }

    fn resolve_document(&self, uri: &str) -> Option<TagId> {
        self.host.resolve_document(uri)
    }

    fn resolve_collection(&self, uri: Option<&str>) -> Option<Vec<TagId>> {
        self.host.resolve_collection(uri)
    }

    fn read_unparsed_text(&self, uri: &str) -> Option<String> {
        self.host.read_unparsed_text(uri)
    }
}

/// RAII guard popping a variable scope pushed by [`EvalContext::push_scope`].
pub struct ScopeGuard<'a, 'h, H: XmlHost> {
    ctx: &'a mut EvalContext<'h, H>,
}

impl<'h, H: XmlHost> Deref for ScopeGuard<'_, 'h, H> {
    type Target = EvalContext<'h, H>;
    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl<'h, H: XmlHost> DerefMut for ScopeGuard<'_, 'h, H> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl<H: XmlHost> Drop for ScopeGuard<'_, '_, H> {
    fn drop(&mut self) {
        self.ctx.scopes.pop();
    }
}

/// Parse `query` into a [`CompiledQuery`] (§4.16 `compile`).
pub fn compile(query: &str) -> Result<CompiledQuery, Error> {
    parser::compile(query)
}

/// Evaluate a compiled query against `host`'s document, returning the
/// resulting value (§4.16 `evaluate`).
pub fn evaluate<H: XmlHost>(host: &mut H, compiled: &CompiledQuery, config: EvaluatorConfig) -> Result<XPathValue, Error> {
    let _span = tracing::debug_span!("xpath_evaluate").entered();
    let mut ctx = EvalContext::new(host, config);
    ctx.cache.reset();
    ctx.arena.reset();
    let result = ctx.eval_expr(&compiled.expr);
    if let Err(e) = &result {
        ctx.host.set_error_message(e.to_string());
    }
    result
}

/// Evaluate a compiled query over a node-set result, invoking `callback`
/// once per resulting node/attribute match in document order and stopping
/// early if the callback requests it. Without a callback, stops at the
/// first match and leaves the host's cursor positioned there (§4.16
/// `query`, §9 "Callback plurality").
pub fn query<H: XmlHost>(
    host: &mut H,
    compiled: &CompiledQuery,
    config: EvaluatorConfig,
    mut callback: Option<Callback<'_>>,
) -> Result<(), Error> {
    let value = evaluate(host, compiled, config)?;
    let Some(ns) = value.into_node_set() else {
        return Ok(());
    };
    for m in ns.matches() {
        host.set_cursor(m.node, m.attr.as_deref());
        match &mut callback {
            Some(cb) => {
                if let CallbackAction::Terminate = cb(m.node, m.attr.as_deref()) {
                    break;
                }
            }
            None => break,
        }
    }
    Ok(())
}
