//! Recursive-descent parser over the tokenizer's stream (§2.2 "Parser",
//! §4.9).
//!
//! Precedence climbs `FlworExpr|OrExpr → AndExpr → EqExpr → RelExpr →
//! AddExpr → MulExpr → UnaryExpr → IntersectExpr → UnionExpr → PathExpr`
//! exactly as §4.9's grammar lists it, low to high. Diagnostics accumulate
//! non-fatally (unknown tokenizer characters, recoverable oddities); a
//! structural parse failure returns `Err` immediately with every
//! diagnostic collected so far joined together (§4.9: "collects error
//! strings non-fatally... returns null on any hard failure").

use crate::xpath::ast::*;
use crate::xpath::lexer::tokenize;
use crate::xpath::token::{AvtPart, TokenKind};
use crate::xpath::Error;

/// The result of a successful [`compile`]: the parsed tree plus any
/// non-fatal diagnostics the lexer or parser collected along the way
/// (§4.9: "Error strings are surfaced to the host via a diagnostic
/// field").
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub expr: Expr,
    pub diagnostics: Vec<String>,
}

/// Parse `src` into a [`CompiledQuery`] (§4.16 `compile`).
pub fn compile(src: &str) -> Result<CompiledQuery, Error> {
    let (tokens, lex_diag) = tokenize(src);
    let mut parser = Parser {
        tokens,
        pos: 0,
        diagnostics: lex_diag,
    };
    let expr = parser.parse_expr()?;
    if !parser.check(TokenKind::Eof) {
        let msg = format!("unexpected trailing input near {:?}", parser.peek_kind());
        return Err(parser.syntax_error(msg));
    }
    Ok(CompiledQuery {
        expr,
        diagnostics: parser.diagnostics,
    })
}

struct Parser {
    tokens: Vec<crate::xpath::token::Token>,
    pos: usize,
    diagnostics: Vec<String>,
}

impl Parser {
    fn peek_kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn peek_ahead_kind(&self, n: usize) -> &TokenKind {
        let idx = (self.pos + n).min(self.tokens.len() - 1);
        &self.tokens[idx].kind
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.tokens[self.pos].kind.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn check(&self, kind: TokenKind) -> bool {
        *self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), Error> {
        if self.eat(kind.clone()) {
            Ok(())
        } else {
            let msg = format!("expected {kind:?}, found {:?}", self.peek_kind());
            Err(self.syntax_error(msg))
        }
    }

    fn syntax_error(&mut self, msg: impl Into<String>) -> Error {
        self.diagnostics.push(msg.into());
        Error::Syntax(self.diagnostics.join("; "))
    }

    fn expect_plain_identifier(&mut self) -> Result<String, Error> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.syntax_error(format!("expected identifier, found {other:?}"))),
        }
    }

    fn expect_text_content(&mut self) -> Result<String, Error> {
        match self.peek_kind().clone() {
            TokenKind::TextContent(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.syntax_error(format!("expected tag name, found {other:?}"))),
        }
    }

    /// Parse a (possibly-prefixed) name, accepting both plain identifiers
    /// and the reserved-keyword spellings (`element`, `text`, ...) that
    /// can legitimately appear as a literal name in `element Name {...}`
    /// or `processing-instruction Name {...}` position.
    fn parse_qname_token(&mut self) -> Result<QName, Error> {
        let first = match self.peek_kind().clone() {
            TokenKind::Identifier(s) => s,
            TokenKind::Element => "element".to_string(),
            TokenKind::Attribute => "attribute".to_string(),
            TokenKind::Text => "text".to_string(),
            TokenKind::Comment => "comment".to_string(),
            TokenKind::ProcessingInstruction => "processing-instruction".to_string(),
            TokenKind::Document => "document".to_string(),
            other => return Err(self.syntax_error(format!("expected name, found {other:?}"))),
        };
        self.advance();
        if self.eat(TokenKind::Colon) {
            let local = self.expect_plain_identifier()?;
            Ok(QName {
                prefix: Some(first),
                local,
            })
        } else {
            Ok(QName::local(first))
        }
    }

    // ---- Expr := FlworExpr | OrExpr ----

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        if matches!(self.peek_kind(), TokenKind::For | TokenKind::Let) {
            self.parse_flwor()
        } else {
            self.parse_or_expr()
        }
    }

    fn parse_flwor(&mut self) -> Result<Expr, Error> {
        let mut clauses = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::For => {
                    self.advance();
                    self.expect(TokenKind::Dollar)?;
                    let var = self.expect_plain_identifier()?;
                    self.expect(TokenKind::In)?;
                    let expr = self.parse_expr()?;
                    clauses.push(FlworClause::For(Binding { var, expr }));
                }
                TokenKind::Let => {
                    self.advance();
                    self.expect(TokenKind::Dollar)?;
                    let var = self.expect_plain_identifier()?;
                    self.expect(TokenKind::Walrus)?;
                    let expr = self.parse_expr()?;
                    clauses.push(FlworClause::Let(Binding { var, expr }));
                }
                _ => break,
            }
        }
        if clauses.is_empty() {
            return Err(self.syntax_error("expected 'for' or 'let'"));
        }
        if self.eat(TokenKind::Where) {
            let expr = self.parse_expr()?;
            clauses.push(FlworClause::Where(expr));
        }
        if self.eat(TokenKind::GroupBy) {
            let keys = self.parse_group_keys()?;
            clauses.push(FlworClause::GroupBy(keys));
        }
        let stable = self.check(TokenKind::StableOrderBy);
        if stable || self.check(TokenKind::OrderBy) {
            self.advance();
            let specs = self.parse_order_specs()?;
            clauses.push(FlworClause::OrderBy { stable, specs });
        }
        if self.eat(TokenKind::Count) {
            self.expect(TokenKind::Dollar)?;
            let var = self.expect_plain_identifier()?;
            clauses.push(FlworClause::Count(var));
        }
        self.expect(TokenKind::Return)?;
        let return_expr = self.parse_expr()?;
        Ok(Expr::Flwor(FlworExpr {
            clauses,
            return_expr: Box::new(return_expr),
        }))
    }

    fn parse_group_keys(&mut self) -> Result<Vec<GroupKey>, Error> {
        let mut keys = vec![self.parse_group_key()?];
        while self.eat(TokenKind::Comma) {
            keys.push(self.parse_group_key()?);
        }
        Ok(keys)
    }

    fn parse_group_key(&mut self) -> Result<GroupKey, Error> {
        if self.check(TokenKind::Dollar) {
            self.advance();
            let var = self.expect_plain_identifier()?;
            Ok(GroupKey {
                binds: Some(var.clone()),
                expr: Expr::VariableRef(var),
            })
        } else {
            let expr = self.parse_expr()?;
            Ok(GroupKey { binds: None, expr })
        }
    }

    fn parse_order_specs(&mut self) -> Result<Vec<OrderSpec>, Error> {
        let mut specs = vec![self.parse_order_spec()?];
        while self.eat(TokenKind::Comma) {
            specs.push(self.parse_order_spec()?);
        }
        Ok(specs)
    }

    fn parse_order_spec(&mut self) -> Result<OrderSpec, Error> {
        let expr = self.parse_expr()?;
        let mut descending = false;
        if self.eat(TokenKind::Ascending) {
            // default
        } else if self.eat(TokenKind::Descending) {
            descending = true;
        }
        // Default resolved in DESIGN.md: unspecified `empty` mode sorts
        // empty sequences last ("greatest") regardless of direction.
        let mut empty_greatest = true;
        if self.eat(TokenKind::EmptyGreatest) {
            empty_greatest = true;
        } else if self.eat(TokenKind::EmptyLeast) {
            empty_greatest = false;
        }
        let collation = if self.eat(TokenKind::Collation) {
            match self.peek_kind().clone() {
                TokenKind::String(s) => {
                    self.advance();
                    Some(s)
                }
                other => return Err(self.syntax_error(format!("expected collation URI, found {other:?}"))),
            }
        } else {
            None
        };
        Ok(OrderSpec {
            expr,
            descending,
            empty_greatest,
            collation,
        })
    }

    // ---- OrExpr ... MulExpr ----

    fn parse_or_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_and_expr()?;
        while self.eat(TokenKind::Or) {
            let rhs = self.parse_and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_eq_expr()?;
        while self.eat(TokenKind::And) {
            let rhs = self.parse_eq_expr()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_eq_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_rel_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Assign => BinOp::GeneralEq,
                TokenKind::NotEqualOp => BinOp::GeneralNe,
                TokenKind::Eq => BinOp::ValueEq,
                TokenKind::Ne => BinOp::ValueNe,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_rel_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_rel_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_add_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::LessThan => BinOp::GeneralLt,
                TokenKind::LessEqual => BinOp::GeneralLe,
                TokenKind::GreaterThan => BinOp::GeneralGt,
                TokenKind::GreaterEqual => BinOp::GeneralGe,
                TokenKind::Lt => BinOp::ValueLt,
                TokenKind::Le => BinOp::ValueLe,
                TokenKind::Gt => BinOp::ValueGt,
                TokenKind::Ge => BinOp::ValueGe,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_add_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_add_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_mul_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_mul_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_mul_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Multiply => BinOp::Mul,
                TokenKind::Div => BinOp::Div,
                TokenKind::Mod => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary_expr()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, Error> {
        if self.eat(TokenKind::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary_expr()?)));
        }
        if self.eat(TokenKind::Plus) {
            return self.parse_unary_expr();
        }
        if self.eat(TokenKind::Not) {
            return Ok(Expr::Not(Box::new(self.parse_unary_expr()?)));
        }
        self.parse_intersect_expr()
    }

    fn parse_intersect_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_union_expr()?;
        loop {
            let op = match self.peek_kind() {
                TokenKind::Intersect => SetOp::Intersect,
                TokenKind::Except => SetOp::Except,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_union_expr()?;
            lhs = Expr::SetOp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_union_expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.parse_path_expr()?;
        loop {
            if !matches!(self.peek_kind(), TokenKind::Pipe | TokenKind::Union) {
                break;
            }
            self.advance();
            let rhs = self.parse_path_expr()?;
            lhs = Expr::SetOp {
                op: SetOp::Union,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    // ---- PathExpr ----

    fn parse_path_expr(&mut self) -> Result<Expr, Error> {
        if self.eat(TokenKind::Slash) {
            if self.is_step_start() {
                let steps = self.parse_relative_path()?;
                return Ok(Expr::Path(PathExpr {
                    rooted: true,
                    leading_descendant: false,
                    steps,
                    base: None,
                }));
            }
            return Ok(Expr::Path(PathExpr {
                rooted: true,
                leading_descendant: false,
                steps: Vec::new(),
                base: None,
            }));
        }
        if self.eat(TokenKind::SlashSlash) {
            let mut steps = vec![implicit_descendant_or_self()];
            steps.extend(self.parse_relative_path()?);
            return Ok(Expr::Path(PathExpr {
                rooted: true,
                leading_descendant: true,
                steps,
                base: None,
            }));
        }
        if self.is_step_start() {
            let steps = self.parse_relative_path()?;
            return Ok(Expr::Path(PathExpr {
                rooted: false,
                leading_descendant: false,
                steps,
                base: None,
            }));
        }

        // FilterExpr ('/'|'//' Step)*
        let primary = self.parse_primary_expr()?;
        let predicates = self.parse_predicates()?;
        let base = if predicates.is_empty() {
            primary
        } else {
            Expr::Filter {
                base: Box::new(primary),
                predicates,
            }
        };
        let mut steps = Vec::new();
        loop {
            if self.eat(TokenKind::Slash) {
                steps.push(self.parse_step()?);
            } else if self.eat(TokenKind::SlashSlash) {
                steps.push(implicit_descendant_or_self());
                steps.push(self.parse_step()?);
            } else {
                break;
            }
        }
        if steps.is_empty() {
            Ok(base)
        } else {
            Ok(Expr::Path(PathExpr {
                rooted: false,
                leading_descendant: false,
                steps,
                base: Some(Box::new(base)),
            }))
        }
    }

    fn is_step_start(&self) -> bool {
        match self.peek_kind().clone() {
            TokenKind::Dot | TokenKind::DotDot | TokenKind::At | TokenKind::Wildcard => true,
            TokenKind::Identifier(name) => {
                if matches!(self.peek_ahead_kind(1), TokenKind::ColonColon) {
                    return true;
                }
                if matches!(self.peek_ahead_kind(1), TokenKind::LeftParen) {
                    return name == "node";
                }
                true
            }
            TokenKind::Text | TokenKind::Comment => {
                !matches!(self.peek_ahead_kind(1), TokenKind::LeftBrace)
            }
            TokenKind::ProcessingInstruction => !matches!(
                self.peek_ahead_kind(1),
                TokenKind::LeftBrace | TokenKind::Identifier(_)
            ),
            TokenKind::Element | TokenKind::Attribute | TokenKind::Document => !matches!(
                self.peek_ahead_kind(1),
                TokenKind::LeftBrace | TokenKind::Identifier(_)
            ),
            _ => false,
        }
    }

    fn parse_relative_path(&mut self) -> Result<Vec<Step>, Error> {
        let mut steps = vec![self.parse_step()?];
        loop {
            if self.eat(TokenKind::Slash) {
                steps.push(self.parse_step()?);
            } else if self.eat(TokenKind::SlashSlash) {
                steps.push(implicit_descendant_or_self());
                steps.push(self.parse_step()?);
            } else {
                break;
            }
        }
        Ok(steps)
    }

    fn parse_step(&mut self) -> Result<Step, Error> {
        match self.peek_kind().clone() {
            TokenKind::Dot => {
                self.advance();
                Ok(Step {
                    axis: Axis::SelfAxis,
                    test: NodeTest::Node,
                    predicates: self.parse_predicates()?,
                })
            }
            TokenKind::DotDot => {
                self.advance();
                Ok(Step {
                    axis: Axis::Parent,
                    test: NodeTest::Node,
                    predicates: self.parse_predicates()?,
                })
            }
            TokenKind::At => {
                self.advance();
                let test = self.parse_node_test()?;
                Ok(Step {
                    axis: Axis::Attribute,
                    test,
                    predicates: self.parse_predicates()?,
                })
            }
            TokenKind::Identifier(name)
                if matches!(self.peek_ahead_kind(1), TokenKind::ColonColon) =>
            {
                self.advance();
                self.expect(TokenKind::ColonColon)?;
                let axis = Axis::parse(&name)
                    .ok_or_else(|| self.syntax_error(format!("unknown axis '{name}'")))?;
                let test = self.parse_node_test()?;
                Ok(Step {
                    axis,
                    test,
                    predicates: self.parse_predicates()?,
                })
            }
            _ => {
                let test = self.parse_node_test()?;
                Ok(Step {
                    axis: Axis::Child,
                    test,
                    predicates: self.parse_predicates()?,
                })
            }
        }
    }

    fn parse_node_test(&mut self) -> Result<NodeTest, Error> {
        match self.peek_kind().clone() {
            TokenKind::Wildcard => {
                self.advance();
                Ok(NodeTest::Wildcard)
            }
            TokenKind::Identifier(name) => {
                self.advance();
                if name == "node" && self.eat(TokenKind::LeftParen) {
                    self.expect(TokenKind::RightParen)?;
                    return Ok(NodeTest::Node);
                }
                if self.eat(TokenKind::Colon) {
                    let local = self.expect_plain_identifier()?;
                    return Ok(NodeTest::Name(QName {
                        prefix: Some(name),
                        local,
                    }));
                }
                Ok(NodeTest::Name(QName::local(name)))
            }
            TokenKind::Text => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                self.expect(TokenKind::RightParen)?;
                Ok(NodeTest::Text)
            }
            TokenKind::Comment => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                self.expect(TokenKind::RightParen)?;
                Ok(NodeTest::Comment)
            }
            TokenKind::ProcessingInstruction => {
                self.advance();
                self.expect(TokenKind::LeftParen)?;
                let target = match self.peek_kind().clone() {
                    TokenKind::String(s) => {
                        self.advance();
                        Some(s)
                    }
                    _ => None,
                };
                self.expect(TokenKind::RightParen)?;
                Ok(NodeTest::ProcessingInstruction(target))
            }
            TokenKind::Element => {
                self.advance();
                Ok(NodeTest::Name(QName::local("element")))
            }
            TokenKind::Attribute => {
                self.advance();
                Ok(NodeTest::Name(QName::local("attribute")))
            }
            TokenKind::Document => {
                self.advance();
                Ok(NodeTest::Name(QName::local("document")))
            }
            other => Err(self.syntax_error(format!("expected node test, found {other:?}"))),
        }
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, Error> {
        let mut preds = Vec::new();
        while self.eat(TokenKind::LeftBracket) {
            preds.push(self.parse_expr()?);
            self.expect(TokenKind::RightBracket)?;
        }
        Ok(preds)
    }

    // ---- PrimaryExpr ----

    fn parse_primary_expr(&mut self) -> Result<Expr, Error> {
        match self.peek_kind().clone() {
            TokenKind::Number(n) => {
                self.advance();
                Ok(Expr::Number(n))
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            TokenKind::Dollar => {
                self.advance();
                let name = self.expect_plain_identifier()?;
                Ok(Expr::VariableRef(name))
            }
            TokenKind::LeftParen => {
                self.advance();
                if self.eat(TokenKind::RightParen) {
                    return Ok(Expr::Sequence(Vec::new()));
                }
                let mut items = vec![self.parse_expr()?];
                while self.eat(TokenKind::Comma) {
                    items.push(self.parse_expr()?);
                }
                self.expect(TokenKind::RightParen)?;
                if items.len() == 1 {
                    Ok(items.pop().unwrap())
                } else {
                    Ok(Expr::Sequence(items))
                }
            }
            TokenKind::If => self.parse_if(),
            TokenKind::Some | TokenKind::Every => self.parse_quantified(),
            TokenKind::TagOpen => self.parse_direct_element(),
            TokenKind::PiOpen(_) => self.parse_direct_pi(),
            TokenKind::Element => self.parse_computed_element_or_attribute(true),
            TokenKind::Attribute => self.parse_computed_element_or_attribute(false),
            TokenKind::Text => self.parse_computed_text(),
            TokenKind::Comment => self.parse_computed_comment_or_document(true),
            TokenKind::ProcessingInstruction => self.parse_computed_pi(),
            TokenKind::Document => self.parse_computed_comment_or_document(false),
            TokenKind::Identifier(name) => self.parse_function_call(name),
            other => Err(self.syntax_error(format!("expected an expression, found {other:?}"))),
        }
    }

    fn parse_function_call(&mut self, first: String) -> Result<Expr, Error> {
        self.advance();
        let mut qname = QName::local(first);
        if self.eat(TokenKind::Colon) {
            let local = self.expect_plain_identifier()?;
            qname = QName {
                prefix: Some(qname.local),
                local,
            };
        }
        self.expect(TokenKind::LeftParen)?;
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            args.push(self.parse_expr()?);
            while self.eat(TokenKind::Comma) {
                args.push(self.parse_expr()?);
            }
        }
        self.expect(TokenKind::RightParen)?;
        Ok(Expr::FunctionCall { name: qname, args })
    }

    fn parse_if(&mut self) -> Result<Expr, Error> {
        self.advance();
        self.expect(TokenKind::LeftParen)?;
        let cond = self.parse_expr()?;
        self.expect(TokenKind::RightParen)?;
        self.expect(TokenKind::Then)?;
        let then_branch = self.parse_expr()?;
        self.expect(TokenKind::Else)?;
        let else_branch = self.parse_expr()?;
        Ok(Expr::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        })
    }

    fn parse_quantified(&mut self) -> Result<Expr, Error> {
        let kind = if self.check(TokenKind::Some) {
            QuantKind::Some
        } else {
            QuantKind::Every
        };
        self.advance();
        let mut bindings = vec![self.parse_quant_binding()?];
        while self.eat(TokenKind::Comma) {
            bindings.push(self.parse_quant_binding()?);
        }
        self.expect(TokenKind::Satisfies)?;
        let satisfies = self.parse_expr()?;
        Ok(Expr::Quantified {
            kind,
            bindings,
            satisfies: Box::new(satisfies),
        })
    }

    fn parse_quant_binding(&mut self) -> Result<Binding, Error> {
        self.expect(TokenKind::Dollar)?;
        let var = self.expect_plain_identifier()?;
        self.expect(TokenKind::In)?;
        let expr = self.parse_expr()?;
        Ok(Binding { var, expr })
    }

    // ---- Direct constructors ----

    fn parse_direct_element(&mut self) -> Result<Expr, Error> {
        self.advance(); // TagOpen
        let name_str = self.expect_text_content()?;
        let name = QName::parse(&name_str);
        let mut attributes = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::AttrName(attr_name) => {
                    self.advance();
                    let parts = match self.peek_kind().clone() {
                        TokenKind::AttrValue(p) => {
                            self.advance();
                            p
                        }
                        other => {
                            return Err(self.syntax_error(format!(
                                "expected attribute value, found {other:?}"
                            )))
                        }
                    };
                    let value = self.resolve_avt(parts)?;
                    attributes.push(DirectAttr {
                        name: QName::parse(&attr_name),
                        value,
                    });
                }
                TokenKind::TagSelfClose => {
                    self.advance();
                    return Ok(Expr::DirectElement(Box::new(DirectElement {
                        name,
                        attributes,
                        content: Vec::new(),
                    })));
                }
                TokenKind::TagClose => {
                    self.advance();
                    break;
                }
                other => return Err(self.syntax_error(format!("malformed start tag: {other:?}"))),
            }
        }

        let mut content = Vec::new();
        loop {
            match self.peek_kind().clone() {
                TokenKind::TagOpenClose => {
                    self.advance();
                    let _close_name = self.expect_text_content()?;
                    self.expect(TokenKind::TagEnd)?;
                    break;
                }
                TokenKind::TagOpen => {
                    let nested = self.parse_direct_element()?;
                    if let Expr::DirectElement(el) = nested {
                        content.push(ConstructorContent::Element(el));
                    }
                }
                TokenKind::PiOpen(_) => {
                    let pi = self.parse_direct_pi()?;
                    content.push(ConstructorContent::Expr(pi));
                }
                TokenKind::TextContent(s) => {
                    self.advance();
                    if let Some(src) = s.strip_prefix("\u{0}EXPR\u{0}") {
                        content.push(ConstructorContent::Expr(Parser::parse_nested(src)?));
                    } else if !s.is_empty() {
                        content.push(ConstructorContent::Text(s));
                    }
                }
                TokenKind::Eof => {
                    return Err(self.syntax_error("unterminated element constructor"))
                }
                other => {
                    return Err(self.syntax_error(format!("unexpected token in content: {other:?}")))
                }
            }
        }
        Ok(Expr::DirectElement(Box::new(DirectElement {
            name,
            attributes,
            content,
        })))
    }

    fn parse_direct_pi(&mut self) -> Result<Expr, Error> {
        let target = match self.peek_kind().clone() {
            TokenKind::PiOpen(t) => t,
            other => return Err(self.syntax_error(format!("expected PI, found {other:?}"))),
        };
        self.advance();
        let content = match self.peek_kind().clone() {
            TokenKind::TextContent(s) => {
                self.advance();
                s
            }
            _ => String::new(),
        };
        self.expect(TokenKind::PiClose)?;
        Ok(Expr::DirectPi(DirectPi { target, content }))
    }

    fn resolve_avt(&mut self, parts: Vec<AvtPart>) -> Result<Vec<AvtSegment>, Error> {
        parts
            .into_iter()
            .map(|p| match p {
                AvtPart::Literal(s) => Ok(AvtSegment::Literal(s)),
                AvtPart::Expression(src) => Ok(AvtSegment::Expr(Parser::parse_nested(&src)?)),
            })
            .collect()
    }

    /// Parse a nested `{...}` expression source (AVT part, enclosed
    /// content expression) in an isolated sub-parser; its own
    /// diagnostics don't propagate into the outer query's list since the
    /// lexer already balanced the braces for us.
    fn parse_nested(src: &str) -> Result<Expr, Error> {
        let (tokens, diag) = tokenize(src);
        let mut p = Parser {
            tokens,
            pos: 0,
            diagnostics: diag,
        };
        p.parse_expr()
    }

    // ---- Computed constructors ----

    fn parse_computed_name_content(&mut self) -> Result<(NameSpec, Expr), Error> {
        let name = if self.eat(TokenKind::LeftBrace) {
            let e = self.parse_expr()?;
            self.expect(TokenKind::RightBrace)?;
            NameSpec::Computed(Box::new(e))
        } else {
            NameSpec::Literal(self.parse_qname_token()?)
        };
        self.expect(TokenKind::LeftBrace)?;
        let content = if self.check(TokenKind::RightBrace) {
            Expr::Sequence(Vec::new())
        } else {
            self.parse_expr()?
        };
        self.expect(TokenKind::RightBrace)?;
        Ok((name, content))
    }

    fn parse_computed_element_or_attribute(&mut self, is_element: bool) -> Result<Expr, Error> {
        self.advance();
        let (name, content) = self.parse_computed_name_content()?;
        Ok(Expr::Computed(if is_element {
            ComputedConstructor::Element {
                name,
                content: Box::new(content),
            }
        } else {
            ComputedConstructor::Attribute {
                name,
                content: Box::new(content),
            }
        }))
    }

    fn parse_computed_text(&mut self) -> Result<Expr, Error> {
        self.advance();
        self.expect(TokenKind::LeftBrace)?;
        let content = if self.check(TokenKind::RightBrace) {
            Expr::Sequence(Vec::new())
        } else {
            self.parse_expr()?
        };
        self.expect(TokenKind::RightBrace)?;
        Ok(Expr::Computed(ComputedConstructor::Text(Box::new(content))))
    }

    fn parse_computed_comment_or_document(&mut self, is_comment: bool) -> Result<Expr, Error> {
        self.advance();
        self.expect(TokenKind::LeftBrace)?;
        let content = if self.check(TokenKind::RightBrace) {
            Expr::Sequence(Vec::new())
        } else {
            self.parse_expr()?
        };
        self.expect(TokenKind::RightBrace)?;
        Ok(Expr::Computed(if is_comment {
            ComputedConstructor::Comment(Box::new(content))
        } else {
            ComputedConstructor::Document(Box::new(content))
        }))
    }

    fn parse_computed_pi(&mut self) -> Result<Expr, Error> {
        self.advance();
        let target = if self.eat(TokenKind::LeftBrace) {
            let e = self.parse_expr()?;
            self.expect(TokenKind::RightBrace)?;
            NameSpec::Computed(Box::new(e))
        } else {
            NameSpec::Literal(self.parse_qname_token()?)
        };
        self.expect(TokenKind::LeftBrace)?;
        let content = if self.check(TokenKind::RightBrace) {
            Expr::Sequence(Vec::new())
        } else {
            self.parse_expr()?
        };
        self.expect(TokenKind::RightBrace)?;
        Ok(Expr::Computed(ComputedConstructor::ProcessingInstruction {
            target,
            content: Box::new(content),
        }))
    }
}

fn implicit_descendant_or_self() -> Step {
    Step {
        axis: Axis::DescendantOrSelf,
        test: NodeTest::Node,
        predicates: Vec::new(),
    }
}
