//! XPath 2.0 / XQuery tokenizer, parser, evaluator, and function library
//! (§OVERVIEW, §2 "Module map").
//!
//! The pipeline is [`lexer`] → [`parser`] → [`eval`], with [`axis`],
//! [`flwor`], [`functions`], and [`constructor`] supplying the evaluator's
//! axis/FLWOR/function-call/node-construction behavior and [`schema`]
//! supplying typed coercion. [`host`] is the seam a caller implements to
//! expose its own document tree; [`value`] is the result type everything
//! produces.

mod axis;
mod ast;
mod constructor;
mod error;
mod eval;
mod flwor;
mod functions;
mod host;
mod lexer;
mod parser;
mod schema;
mod token;
mod value;

pub use ast::{
    Axis, AvtSegment, Binding, BinOp, ComputedConstructor, ConstructorContent, DirectAttr,
    DirectElement, DirectPi, Expr, FlworClause, FlworExpr, GroupKey, NameSpec, NodeTest,
    OrderSpec, PathExpr, QName, QuantKind, SetOp, Step,
};
pub use error::Error;
pub use eval::{compile, evaluate, query, ContextFrame, EvalContext, EvaluatorConfig};
pub use host::{Callback, CallbackAction, InMemoryHost, Tag, TagId, XmlHost};
pub use parser::CompiledQuery;
pub use schema::{CompareOp, SchemaRegistry, SchemaType};
pub use value::{format_number, NodeMatch, NodeSet, XPathValue};
