//! Single-pass tokenizer (§4.8).
//!
//! The hardest parts are entirely disambiguation: `*` reads as either
//! `WILDCARD` or `MULTIPLY` depending on what came before and what comes
//! next, and `<` reads as either `LESS_THAN` or the start of a direct
//! element constructor. Both rules are implemented exactly as §4.8
//! describes them, driven off the *previous emitted token* rather than
//! any parser-level lookahead.

use super::token::{AvtPart, Token, TokenKind};

/// Lexer state while scanning tag markup vs. ordinary expression text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Ordinary expression tokenizing.
    TopLevel,
    /// Inside a direct constructor's content, between `>` and the
    /// matching close tag.
    Content,
}

/// Forgiving single-pass lexer producing a flat token stream plus
/// non-fatal diagnostics for unrecognized characters (§4.8: "produces an
/// `UNKNOWN` token rather than failing").
pub struct Lexer<'a> {
    src: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    mode_stack: Vec<Mode>,
    prev_kind: Option<TokenKind>,
    pending: std::collections::VecDeque<Token>,
    /// Non-fatal diagnostics collected while scanning (e.g. unterminated
    /// strings, unknown characters) — surfaced by the parser (§4.8, §4.9).
    pub diagnostics: Vec<String>,
}

impl<'a> Lexer<'a> {
    /// Build a lexer over `src`.
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().collect(),
            pos: 0,
            mode_stack: vec![Mode::TopLevel],
            prev_kind: None,
            pending: std::collections::VecDeque::new(),
            diagnostics: Vec::new(),
        }
    }

    fn mode(&self) -> Mode {
        *self.mode_stack.last().unwrap_or(&Mode::TopLevel)
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).map(|&(_, c)| c)
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.chars.get(self.pos + n).map(|&(_, c)| c)
    }

    fn byte_offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|&(b, _)| b)
            .unwrap_or(self.src.len())
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek_char();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek_char(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn emit(&mut self, kind: TokenKind, start: usize) -> Token {
        let end = self.byte_offset();
        let tok = Token::new(kind.clone(), start, end.saturating_sub(start).max(1));
        self.prev_kind = Some(kind);
        tok
    }

    /// Produce the next token.
    pub fn next_token(&mut self) -> Token {
        if let Some(tok) = self.pending.pop_front() {
            self.prev_kind = Some(tok.kind.clone());
            return tok;
        }
        match self.mode() {
            Mode::TopLevel => self.next_top_level(),
            Mode::Content => self.next_content(),
        }
    }

    fn next_top_level(&mut self) -> Token {
        self.skip_ws();
        let start = self.byte_offset();
        let Some(c) = self.peek_char() else {
            return self.emit(TokenKind::Eof, start);
        };

        if c.is_ascii_digit() || (c == '.' && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit())) {
            return self.scan_number(start);
        }
        if c == '\'' || c == '"' {
            return self.scan_string(start);
        }
        if is_name_start(c) {
            return self.scan_identifier_or_keyword(start);
        }

        match c {
            '/' => {
                self.advance();
                if self.peek_char() == Some('/') {
                    self.advance();
                    self.emit(TokenKind::SlashSlash, start)
                } else {
                    self.emit(TokenKind::Slash, start)
                }
            }
            '.' => {
                self.advance();
                if self.peek_char() == Some('.') {
                    self.advance();
                    self.emit(TokenKind::DotDot, start)
                } else {
                    self.emit(TokenKind::Dot, start)
                }
            }
            '[' => {
                self.advance();
                self.emit(TokenKind::LeftBracket, start)
            }
            ']' => {
                self.advance();
                self.emit(TokenKind::RightBracket, start)
            }
            '(' => {
                self.advance();
                self.emit(TokenKind::LeftParen, start)
            }
            ')' => {
                self.advance();
                self.emit(TokenKind::RightParen, start)
            }
            '@' => {
                self.advance();
                self.emit(TokenKind::At, start)
            }
            ',' => {
                self.advance();
                self.emit(TokenKind::Comma, start)
            }
            '|' => {
                self.advance();
                self.emit(TokenKind::Pipe, start)
            }
            '=' => {
                self.advance();
                self.emit(TokenKind::Assign, start)
            }
            '!' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    self.emit(TokenKind::NotEqualOp, start)
                } else {
                    self.emit(TokenKind::Unknown('!'), start)
                }
            }
            '<' => self.scan_less_than(start),
            '>' => {
                self.advance();
                if self.peek_char() == Some('=') {
                    self.advance();
                    self.emit(TokenKind::GreaterEqual, start)
                } else {
                    self.emit(TokenKind::GreaterThan, start)
                }
            }
            '+' => {
                self.advance();
                self.emit(TokenKind::Plus, start)
            }
            '-' => {
                self.advance();
                self.emit(TokenKind::Minus, start)
            }
            '*' => self.scan_star(start),
            ':' => {
                self.advance();
                if self.peek_char() == Some(':') {
                    self.advance();
                    self.emit(TokenKind::ColonColon, start)
                } else if self.peek_char() == Some('=') {
                    self.advance();
                    self.emit(TokenKind::Walrus, start)
                } else {
                    self.emit(TokenKind::Colon, start)
                }
            }
            '$' => {
                self.advance();
                self.emit(TokenKind::Dollar, start)
            }
            '{' => {
                self.advance();
                self.emit(TokenKind::LeftBrace, start)
            }
            '}' => {
                self.advance();
                self.emit(TokenKind::RightBrace, start)
            }
            other => {
                self.advance();
                self.diagnostics
                    .push(format!("unexpected character '{other}' at byte {start}"));
                self.emit(TokenKind::Unknown(other), start)
            }
        }
    }

    fn scan_number(&mut self, start: usize) -> Token {
        let mut s = String::new();
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            s.push(self.advance().unwrap());
        }
        if self.peek_char() == Some('.') {
            s.push(self.advance().unwrap());
            while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
                s.push(self.advance().unwrap());
            }
        }
        let v: f64 = s.parse().unwrap_or(f64::NAN);
        self.emit(TokenKind::Number(v), start)
    }

    fn scan_string(&mut self, start: usize) -> Token {
        let quote = self.advance().unwrap();
        let mut s = String::new();
        loop {
            match self.advance() {
                None => {
                    self.diagnostics.push("unterminated string literal".into());
                    break;
                }
                Some('\\') if matches!(self.peek_char(), Some('\\') | Some('\'') | Some('"') | Some('*')) => {
                    s.push(self.advance().unwrap());
                }
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
            }
        }
        self.emit(TokenKind::String(s), start)
    }

    fn scan_identifier_or_keyword(&mut self, start: usize) -> Token {
        let mut s = String::new();
        while matches!(self.peek_char(), Some(c) if is_name_char(c)) {
            s.push(self.advance().unwrap());
        }
        let kind = self.classify_word(&s);
        self.emit(kind, start)
    }

    fn classify_word(&mut self, word: &str) -> TokenKind {
        match word {
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "div" => TokenKind::Div,
            "mod" => TokenKind::Mod,
            "union" => TokenKind::Union,
            "intersect" => TokenKind::Intersect,
            "except" => TokenKind::Except,
            "eq" => TokenKind::Eq,
            "ne" => TokenKind::Ne,
            "lt" => TokenKind::Lt,
            "le" => TokenKind::Le,
            "gt" => TokenKind::Gt,
            "ge" => TokenKind::Ge,
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "else" => TokenKind::Else,
            "for" => TokenKind::For,
            "let" => TokenKind::Let,
            "in" => TokenKind::In,
            "return" => TokenKind::Return,
            "where" => TokenKind::Where,
            "ascending" => TokenKind::Ascending,
            "descending" => TokenKind::Descending,
            "collation" => TokenKind::Collation,
            "some" => TokenKind::Some,
            "every" => TokenKind::Every,
            "satisfies" => TokenKind::Satisfies,
            "element" => TokenKind::Element,
            "attribute" => TokenKind::Attribute,
            "text" => TokenKind::Text,
            "comment" => TokenKind::Comment,
            "processing-instruction" => TokenKind::ProcessingInstruction,
            "document" => TokenKind::Document,
            "count" if self.lookahead_is("$") => TokenKind::Count,
            "group" if self.lookahead_word_is("by") => {
                self.consume_lookahead_word();
                TokenKind::GroupBy
            }
            "order" if self.lookahead_word_is("by") => {
                self.consume_lookahead_word();
                TokenKind::OrderBy
            }
            "stable" if self.lookahead_word_is("order") => {
                self.consume_lookahead_word();
                self.skip_ws();
                // consume the following "by" too, making this one token.
                if self.lookahead_word_is("by") {
                    self.consume_lookahead_word();
                }
                TokenKind::StableOrderBy
            }
            "empty" if self.lookahead_word_is("greatest") => {
                self.consume_lookahead_word();
                TokenKind::EmptyGreatest
            }
            "empty" if self.lookahead_word_is("least") => {
                self.consume_lookahead_word();
                TokenKind::EmptyLeast
            }
            _ => TokenKind::Identifier(word.to_string()),
        }
    }

    /// Whether, ignoring whitespace, the upcoming characters start with
    /// `s` (used for `count $` lookahead; does not consume).
    fn lookahead_is(&self, s: &str) -> bool {
        let mut i = self.pos;
        while matches!(self.chars.get(i), Some((_, c)) if c.is_whitespace()) {
            i += 1;
        }
        let rest: String = self.chars[i..].iter().map(|&(_, c)| c).collect();
        rest.starts_with(s)
    }

    /// Whether the next NCName word (after whitespace) equals `word`.
    fn lookahead_word_is(&self, word: &str) -> bool {
        let mut i = self.pos;
        while matches!(self.chars.get(i), Some((_, c)) if c.is_whitespace()) {
            i += 1;
        }
        let mut j = i;
        while matches!(self.chars.get(j), Some((_, c)) if is_name_char(*c)) {
            j += 1;
        }
        if j == i {
            return false;
        }
        let w: String = self.chars[i..j].iter().map(|&(_, c)| c).collect();
        w == word
    }

    /// Consume the whitespace + word matched by the last
    /// `lookahead_word_is` call.
    fn consume_lookahead_word(&mut self) {
        self.skip_ws();
        while matches!(self.peek_char(), Some(c) if is_name_char(c)) {
            self.pos += 1;
        }
    }

    /// `*` disambiguation (§4.8 "Wildcard vs multiply"): `MULTIPLY` only
    /// when the previous token is an operand, the previous token doesn't
    /// force wildcard context (`@`, `::`, `/`, `//`, `:`), and the next
    /// non-whitespace character begins an operand.
    fn scan_star(&mut self, start: usize) -> Token {
        self.advance();
        let prev_is_operand = self
            .prev_kind
            .as_ref()
            .map(|k| {
                matches!(
                    k,
                    TokenKind::Number(_)
                        | TokenKind::String(_)
                        | TokenKind::Identifier(_)
                        | TokenKind::RightParen
                        | TokenKind::RightBracket
                        | TokenKind::Wildcard
                )
            })
            .unwrap_or(false);
        let forces_wildcard = matches!(
            self.prev_kind,
            Some(TokenKind::At)
                | Some(TokenKind::ColonColon)
                | Some(TokenKind::Slash)
                | Some(TokenKind::SlashSlash)
                | Some(TokenKind::Colon)
        );
        let mut j = self.pos;
        while matches!(self.chars.get(j), Some((_, c)) if c.is_whitespace()) {
            j += 1;
        }
        let next_starts_operand = match self.chars.get(j).map(|&(_, c)| c) {
            Some(c) => is_operand_prefix(c),
            None => false,
        };
        if prev_is_operand && !forces_wildcard && next_starts_operand {
            self.emit(TokenKind::Multiply, start)
        } else {
            self.emit(TokenKind::Wildcard, start)
        }
    }

    /// `<` disambiguation (§4.8 "`<` disambiguation").
    fn scan_less_than(&mut self, start: usize) -> Token {
        self.advance();
        if self.peek_char() == Some('=') {
            self.advance();
            return self.emit(TokenKind::LessEqual, start);
        }
        let prev_is_operand = self
            .prev_kind
            .as_ref()
            .map(Token::is_operand_end_kind)
            .unwrap_or(false);
        if prev_is_operand {
            return self.emit(TokenKind::LessThan, start);
        }
        self.scan_tag_open(start)
    }

    /// Scan a start or end tag: `<Name (Attr="AVT")* (/> | >)` or
    /// `</Name>`, or a PI `<?Target ... ?>`. Emits into `self.pending` and
    /// returns the first token.
    fn scan_tag_open(&mut self, start: usize) -> Token {
        if self.peek_char() == Some('?') {
            self.advance();
            let mut target = String::new();
            while matches!(self.peek_char(), Some(c) if is_name_char(c)) {
                target.push(self.advance().unwrap());
            }
            self.skip_ws();
            let mut content = String::new();
            loop {
                match (self.peek_char(), self.peek_at(1)) {
                    (Some('?'), Some('>')) => {
                        self.advance();
                        self.advance();
                        break;
                    }
                    (Some(c), _) => {
                        content.push(c);
                        self.advance();
                    }
                    (None, _) => break,
                }
            }
            let first = self.emit(TokenKind::PiOpen(target), start);
            if !content.is_empty() {
                self.pending
                    .push_back(Token::new(TokenKind::TextContent(content), start, 1));
            }
            self.pending
                .push_back(Token::new(TokenKind::PiClose, start, 1));
            return first;
        }

        let is_close = self.peek_char() == Some('/');
        if is_close {
            self.advance();
        }
        let mut name = String::new();
        while matches!(self.peek_char(), Some(c) if is_name_char(c) || c == ':') {
            name.push(self.advance().unwrap());
        }

        if is_close {
            self.skip_ws();
            if self.peek_char() == Some('>') {
                self.advance();
            }
            if let Some(Mode::Content) = self.mode_stack.last() {
                self.mode_stack.pop();
            }
            let first = self.emit(TokenKind::TagOpenClose, start);
            self.pending
                .push_back(Token::new(TokenKind::TextContent(name), start, 1));
            self.pending
                .push_back(Token::new(TokenKind::TagEnd, start, 1));
            return first;
        }

        let first = self.emit(TokenKind::TagOpen, start);
        self.pending
            .push_back(Token::new(TokenKind::TextContent(name), start, 1));

        loop {
            self.skip_ws();
            match self.peek_char() {
                Some('/') if self.peek_at(1) == Some('>') => {
                    self.advance();
                    self.advance();
                    self.pending
                        .push_back(Token::new(TokenKind::TagSelfClose, start, 1));
                    break;
                }
                Some('>') => {
                    self.advance();
                    self.pending
                        .push_back(Token::new(TokenKind::TagClose, start, 1));
                    self.mode_stack.push(Mode::Content);
                    break;
                }
                Some(c) if is_name_start(c) || c == ':' => {
                    let mut attr_name = String::new();
                    while matches!(self.peek_char(), Some(c) if is_name_char(c) || c == ':') {
                        attr_name.push(self.advance().unwrap());
                    }
                    self.skip_ws();
                    if self.peek_char() == Some('=') {
                        self.advance();
                    }
                    self.skip_ws();
                    let parts = self.scan_avt_value();
                    self.pending
                        .push_back(Token::new(TokenKind::AttrName(attr_name), start, 1));
                    self.pending
                        .push_back(Token::new(TokenKind::AttrValue(parts), start, 1));
                }
                None => break,
                Some(_) => {
                    self.advance();
                }
            }
        }
        first
    }

    /// Scan a quoted attribute value into alternating literal/expression
    /// parts (§4.8 "Attribute values"): `{{`/`}}` escape braces, `{`
    /// starts an expression, quoted strings inside it pass through
    /// opaquely.
    fn scan_avt_value(&mut self) -> Vec<AvtPart> {
        let quote = match self.peek_char() {
            Some(q @ '"') | Some(q @ '\'') => {
                self.advance();
                q
            }
            _ => return Vec::new(),
        };
        let mut parts = Vec::new();
        let mut literal = String::new();
        loop {
            match self.peek_char() {
                None => break,
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some('{') if self.peek_at(1) == Some('{') => {
                    literal.push('{');
                    self.advance();
                    self.advance();
                }
                Some('}') if self.peek_at(1) == Some('}') => {
                    literal.push('}');
                    self.advance();
                    self.advance();
                }
                Some('{') => {
                    if !literal.is_empty() {
                        parts.push(AvtPart::Literal(std::mem::take(&mut literal)));
                    }
                    self.advance();
                    let expr = self.scan_braced_source(quote);
                    parts.push(AvtPart::Expression(expr));
                }
                Some(c) => {
                    literal.push(c);
                    self.advance();
                }
            }
        }
        if !literal.is_empty() {
            parts.push(AvtPart::Literal(literal));
        }
        parts
    }

    /// Scan raw source up to the matching (depth-tracked) `}`, passing
    /// quoted strings through opaquely so a `}` inside one doesn't end
    /// the expression early.
    fn scan_braced_source(&mut self, outer_quote: char) -> String {
        let mut depth = 1i32;
        let mut out = String::new();
        loop {
            match self.peek_char() {
                None => break,
                Some('{') => {
                    depth += 1;
                    out.push('{');
                    self.advance();
                }
                Some('}') => {
                    depth -= 1;
                    self.advance();
                    if depth == 0 {
                        break;
                    }
                    out.push('}');
                }
                Some(q @ '\'') | Some(q @ '"') if q != outer_quote => {
                    out.push(q);
                    self.advance();
                    while let Some(c) = self.peek_char() {
                        out.push(c);
                        self.advance();
                        if c == q {
                            break;
                        }
                    }
                }
                Some(c) => {
                    out.push(c);
                    self.advance();
                }
            }
        }
        out
    }

    fn next_content(&mut self) -> Token {
        let start = self.byte_offset();
        match self.peek_char() {
            None => self.emit(TokenKind::Eof, start),
            Some('<') => {
                self.pos += 0; // fallthrough to tag scanning
                self.scan_tag_open(start)
            }
            Some('{') if self.peek_at(1) == Some('{') => {
                self.advance();
                self.advance();
                self.scan_content_text(start, "{".to_string())
            }
            Some('{') => {
                self.advance();
                let src = self.scan_braced_source('\0');
                // mark as a distinct token kind so the parser knows to
                // parse `src` as a nested Expr.
                self.emit(TokenKind::TextContent(format!("\u{0}EXPR\u{0}{src}")), start)
            }
            Some(_) => self.scan_content_text(start, String::new()),
        }
    }

    fn scan_content_text(&mut self, start: usize, mut acc: String) -> Token {
        loop {
            match self.peek_char() {
                None | Some('<') => break,
                Some('{') if self.peek_at(1) == Some('{') => {
                    acc.push('{');
                    self.advance();
                    self.advance();
                }
                Some('}') if self.peek_at(1) == Some('}') => {
                    acc.push('}');
                    self.advance();
                    self.advance();
                }
                Some('{') => break,
                Some(c) => {
                    acc.push(c);
                    self.advance();
                }
            }
        }
        self.emit(TokenKind::TextContent(acc), start)
    }
}

impl Token {
    fn is_operand_end_kind(kind: &TokenKind) -> bool {
        matches!(
            kind,
            TokenKind::Number(_)
                | TokenKind::String(_)
                | TokenKind::Identifier(_)
                | TokenKind::RightParen
                | TokenKind::RightBracket
                | TokenKind::Wildcard
                | TokenKind::Multiply
        )
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

/// Characters that can start an operand, used by the `*` disambiguation
/// rule (§4.8).
fn is_operand_prefix(c: char) -> bool {
    c.is_ascii_digit()
        || c == '.'
        || c == '/'
        || is_name_start(c)
        || c == '@'
        || c == '$'
        || c == '('
        || c == '\''
        || c == '"'
        || c == '+'
        || c == '-'
}

/// Tokenize `src` fully, for callers (tests, sub-expression parsing) that
/// want the whole stream up front rather than pulling one token at a
/// time.
pub fn tokenize(src: &str) -> (Vec<Token>, Vec<String>) {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token();
        let is_eof = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if is_eof {
            break;
        }
    }
    (tokens, lexer.diagnostics)
}
