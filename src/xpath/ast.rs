//! The parsed query tree (§3.2 "AST node", §4.9).
//!
//! The source models an AST node as `(type, value-string, children[],
//! optional payload)` — a single tagged-node type with a fixed
//! enumeration and per-node optional extra data. Reproduced here as an
//! idiomatic Rust enum instead: each grammar production gets its own
//! variant with typed fields, which is how this crate's teacher
//! (`rc-zip`) models its own tagged formats (see `format::Method`,
//! `format::Mode`). The *meaning* of every node kind named in §3.2/§4.9
//! is preserved; only the in-memory representation is idiomatic.

/// A possibly-prefixed XML name (§"GLOSSARY" QName).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    /// Namespace prefix, if any (`None` for an unprefixed name).
    pub prefix: Option<String>,
    /// Local part.
    pub local: String,
}

impl QName {
    /// Build an unprefixed name.
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
        }
    }

    /// Parse `prefix:local` or `local`.
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((p, l)) => QName {
                prefix: Some(p.to_string()),
                local: l.to_string(),
            },
            None => QName::local(s),
        }
    }

    /// The full lexical form, `prefix:local` or `local`.
    pub fn to_lexical(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

/// A tree axis (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// `child::`
    Child,
    /// `descendant::`
    Descendant,
    /// `descendant-or-self::`
    DescendantOrSelf,
    /// `parent::`
    Parent,
    /// `ancestor::`
    Ancestor,
    /// `ancestor-or-self::`
    AncestorOrSelf,
    /// `following-sibling::`
    FollowingSibling,
    /// `preceding-sibling::`
    PrecedingSibling,
    /// `following::`
    Following,
    /// `preceding::`
    Preceding,
    /// `self::`
    SelfAxis,
    /// `attribute::` or `@`
    Attribute,
    /// `namespace::`
    Namespace,
}

impl Axis {
    /// Parse an axis name (the NCName before `::`).
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "following" => Axis::Following,
            "preceding" => Axis::Preceding,
            "self" => Axis::SelfAxis,
            "attribute" => Axis::Attribute,
            "namespace" => Axis::Namespace,
            _ => return None,
        })
    }

    /// Whether this axis walks "backward" in document order (ancestor,
    /// preceding, preceding-sibling) — such steps must reverse their raw
    /// traversal order before document-order normalization (§4.10).
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Ancestor | Axis::AncestorOrSelf | Axis::Preceding | Axis::PrecedingSibling
        )
    }
}

/// What a step's node test matches against (§4.9 `NodeTest`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A literal or prefixed name; `*` within a prefix (`ns:*`) is not
    /// modeled separately — only the bare wildcard case is, per §4.8's
    /// wildcard token.
    Name(QName),
    /// `*` — matches any principal node of the axis.
    Wildcard,
    /// `node()`, `text()`, `comment()`, `processing-instruction()` —
    /// kind tests; the `Option<String>` on PI is its optional target
    /// string literal argument.
    Node,
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
}

/// One step of a path expression (§4.9 `Step`).
#[derive(Debug, Clone)]
pub struct Step {
    /// Which axis this step traverses.
    pub axis: Axis,
    /// What the step matches.
    pub test: NodeTest,
    /// Predicates applied left-to-right after the axis test.
    pub predicates: Vec<Expr>,
}

/// A location path (§4.9 `PathExpr`).
#[derive(Debug, Clone)]
pub struct PathExpr {
    /// Whether the path is rooted at the document (`/` or `//` prefix).
    pub rooted: bool,
    /// If rooted via `//`, the first conceptual step is an implicit
    /// `descendant-or-self::node()`.
    pub leading_descendant: bool,
    /// Steps after the optional root/first expression.
    pub steps: Vec<Step>,
    /// When the path starts from a non-step primary expression (e.g.
    /// `(//a)/b` or a function call followed by `/step`), that
    /// expression is evaluated first and the steps walk from its
    /// result (§4.9: "FilterExpr ('/'|'//' Step)*").
    pub base: Option<Box<Expr>>,
}

/// Binary comparison/arithmetic operators (§4.9 grammar, §4.12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    GeneralEq,
    GeneralNe,
    GeneralLt,
    GeneralLe,
    GeneralGt,
    GeneralGe,
    ValueEq,
    ValueNe,
    ValueLt,
    ValueLe,
    ValueGt,
    ValueGe,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// Node-set combination operators (§4.9 `UnionExpr`/`IntersectExpr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

/// `some`/`every` (§4.9 `QuantifiedExpr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantKind {
    Some,
    Every,
}

/// One `for $v in Expr` / `let $v := Expr` binding, shared by plain
/// `ForExpr`/`LetExpr` and the FLWOR pipeline's clauses.
#[derive(Debug, Clone)]
pub struct Binding {
    /// Bound variable name, without the leading `$`.
    pub var: String,
    /// Source expression.
    pub expr: Expr,
}

/// A `group by` key (§3.2 "group-by-key info").
#[derive(Debug, Clone)]
pub struct GroupKey {
    /// When the key itself introduces a binding (`group by $k := expr`
    /// is not legal XQuery surface syntax in this grammar, but a bare
    /// variable reference as the key, e.g. `group by $k`, binds `$k` to
    /// the key value in the merged tuple) this names that variable.
    pub binds: Option<String>,
    /// The key expression.
    pub expr: Expr,
}

/// One `order by` term (§3.2 "order-spec options", §4.9 `OrderSpec`).
#[derive(Debug, Clone)]
pub struct OrderSpec {
    /// The sort key expression.
    pub expr: Expr,
    /// `descending` if true, `ascending` (the default) otherwise.
    pub descending: bool,
    /// Where an empty sequence key sorts: at the end (`true`) or start.
    pub empty_greatest: bool,
    /// An explicit `collation "..."` URI, if given.
    pub collation: Option<String>,
}

/// One clause of a FLWOR pipeline (§4.9 grammar, §4.13).
#[derive(Debug, Clone)]
pub enum FlworClause {
    For(Binding),
    Let(Binding),
    Where(Expr),
    GroupBy(Vec<GroupKey>),
    OrderBy { stable: bool, specs: Vec<OrderSpec> },
    Count(String),
}

/// A full FLWOR expression (§4.9 `FlworExpr`, §4.13).
#[derive(Debug, Clone)]
pub struct FlworExpr {
    /// Clauses in source order (always starting with at least one
    /// `For`/`Let`).
    pub clauses: Vec<FlworClause>,
    /// The trailing `return` expression.
    pub return_expr: Box<Expr>,
}

/// A resolved attribute-value-template segment (§4.8 "Attribute values",
/// §3.2 "attribute-value template parts"): literal text interleaved with
/// already-parsed `{...}` expressions.
#[derive(Debug, Clone)]
pub enum AvtSegment {
    Literal(String),
    Expr(Expr),
}

/// A parsed direct-constructor attribute (§4.9 "Direct constructors").
#[derive(Debug, Clone)]
pub struct DirectAttr {
    pub name: QName,
    pub value: Vec<AvtSegment>,
}

/// One content item inside a direct element constructor (§4.9, §4.15).
#[derive(Debug, Clone)]
pub enum ConstructorContent {
    Text(String),
    Element(Box<DirectElement>),
    Expr(Expr),
}

/// A direct element constructor `<Name (Attr=AVT)* (/> | >Content*</Name>)`
/// (§4.9, §4.15).
#[derive(Debug, Clone)]
pub struct DirectElement {
    pub name: QName,
    pub attributes: Vec<DirectAttr>,
    pub content: Vec<ConstructorContent>,
}

/// A direct PI constructor `<?Target Content?>` (§4.9).
#[derive(Debug, Clone)]
pub struct DirectPi {
    pub target: String,
    pub content: String,
}

/// A name that may be given literally or computed from an expression
/// (§4.9 "Computed constructors", §3.2 "name-expression slot").
#[derive(Debug, Clone)]
pub enum NameSpec {
    Literal(QName),
    Computed(Box<Expr>),
}

/// A computed constructor (§4.9 "Computed constructors", §4.15).
#[derive(Debug, Clone)]
pub enum ComputedConstructor {
    Element { name: NameSpec, content: Box<Expr> },
    Attribute { name: NameSpec, content: Box<Expr> },
    Text(Box<Expr>),
    Comment(Box<Expr>),
    ProcessingInstruction { target: NameSpec, content: Box<Expr> },
    Document(Box<Expr>),
}

/// The query AST (§3.2 "AST node", §4.9).
#[derive(Debug, Clone)]
pub enum Expr {
    Number(f64),
    Str(String),
    VariableRef(String),
    Path(PathExpr),
    /// `FilterExpr ::= PrimaryExpr Predicate*` applied to a non-path
    /// primary (e.g. `$seq[1]`, `(1,2,3)[. > 1]`).
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    SetOp {
        op: SetOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Neg(Box<Expr>),
    Not(Box<Expr>),
    FunctionCall {
        name: QName,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Quantified {
        kind: QuantKind,
        bindings: Vec<Binding>,
        satisfies: Box<Expr>,
    },
    Flwor(FlworExpr),
    DirectElement(Box<DirectElement>),
    DirectPi(DirectPi),
    Computed(ComputedConstructor),
    /// A parenthesized, possibly-empty sequence expression list
    /// `(e1, e2, ...)`; `()` is the empty sequence.
    Sequence(Vec<Expr>),
}
