//! Template parser.
//!
//! Converts the (already rewritten) token stream into a tree of [`Node`]s
//! holding [`Expr`] trees. Expression precedence, loosest first:
//! `or`, `and`, `not`, comparisons (`== != < <= > >= in`, `not in`),
//! `+ -`, `~`, `* / %`, unary minus, then postfix access and filters. Filters
//! bind tighter than any binary operator, which is why the safety rewrite
//! parenthesizes the whole interpolation before appending `| assert_safe`.

use jsql_core::error::{JsqlError, JsqlResult};

use crate::lexer::{Token, TokenKind};

/// A literal value written in template source.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `'text'` or `"text"`
    Str(String),
    /// `42`
    Integer(i64),
    /// `1.5`
    Float(f64),
    /// `true` / `false`
    Bool(bool),
    /// `none`
    None,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

/// An expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A variable or global reference.
    Name(String),
    /// A literal.
    Literal(Literal),
    /// `[a, b, c]`
    List(Vec<Expr>),
    /// `obj.attr`
    Getattr(Box<Expr>, String),
    /// `obj[key]` or `obj.0`
    Getitem(Box<Expr>, Box<Expr>),
    /// `func(args...)`
    Call(Box<Expr>, Vec<Expr>),
    /// `expr | name(args...)`
    Filter {
        /// The filtered expression.
        expr: Box<Expr>,
        /// The filter name.
        name: String,
        /// Extra filter arguments.
        args: Vec<Expr>,
    },
    /// `not expr`
    Not(Box<Expr>),
    /// `-expr`
    Neg(Box<Expr>),
    /// `left op right`
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// A node in the parsed template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// Literal text.
    Data(String),
    /// An interpolation point: `{{ expr }}`.
    Output(Expr),
    /// `{% if %}...{% elif %}...{% else %}...{% endif %}`
    If {
        /// Each condition with the body it guards, in order.
        branches: Vec<(Expr, Vec<Node>)>,
        /// The `else` body (possibly empty).
        else_body: Vec<Node>,
    },
    /// `{% for a, b in items %}...{% else %}...{% endfor %}`
    For {
        /// Loop target names; more than one unpacks each item.
        targets: Vec<String>,
        /// The iterated expression.
        iter: Expr,
        /// The loop body.
        body: Vec<Node>,
        /// Rendered when the iterable is empty.
        else_body: Vec<Node>,
    },
    /// `{% set name = expr %}`
    Set {
        /// Target variable.
        name: String,
        /// Assigned expression.
        value: Expr,
    },
}

/// Parses a token stream into a list of nodes.
///
/// # Errors
///
/// Returns a `TemplateSyntaxError` for malformed expressions, unknown or
/// unbalanced tags, and trailing tokens inside a tag.
pub fn parse(tokens: Vec<Token>) -> JsqlResult<Vec<Node>> {
    let mut parser = Parser { tokens, pos: 0 };
    let (nodes, end) = parser.parse_nodes(&[])?;
    debug_assert!(end.is_none());
    Ok(nodes)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    // ── Token helpers ───────────────────────────────────────────────

    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&TokenKind> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn lineno(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |t| t.lineno)
    }

    fn next(&mut self) -> Option<TokenKind> {
        let token = self.tokens.get(self.pos).map(|t| t.kind.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl std::fmt::Display) -> JsqlError {
        JsqlError::TemplateSyntaxError(format!("line {}: {message}", self.lineno()))
    }

    fn expect(&mut self, expected: &TokenKind) -> JsqlResult<()> {
        match self.peek() {
            Some(kind) if kind == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(kind) => Err(self.error(format!(
                "expected {}, found {}",
                expected.describe(),
                kind.describe()
            ))),
            None => Err(self.error(format!(
                "expected {}, found end of template",
                expected.describe()
            ))),
        }
    }

    fn expect_name(&mut self) -> JsqlResult<String> {
        match self.peek() {
            Some(TokenKind::Name(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            Some(kind) => Err(self.error(format!("expected a name, found {}", kind.describe()))),
            None => Err(self.error("expected a name, found end of template")),
        }
    }

    fn at_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(TokenKind::Name(n)) if n == name)
    }

    fn skip_if(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == Some(kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // ── Template structure ──────────────────────────────────────────

    /// Parses nodes until a block tag named in `end_tags` is reached.
    ///
    /// Returns the nodes and the end tag that stopped parsing. The end tag's
    /// name is consumed; the rest of that tag is left to the caller.
    fn parse_nodes(&mut self, end_tags: &[&str]) -> JsqlResult<(Vec<Node>, Option<String>)> {
        let mut nodes = Vec::new();

        while let Some(kind) = self.next() {
            match kind {
                TokenKind::Data(text) => nodes.push(Node::Data(text)),
                TokenKind::VariableBegin => {
                    let expr = self.parse_expr()?;
                    self.expect(&TokenKind::VariableEnd)?;
                    nodes.push(Node::Output(expr));
                }
                TokenKind::BlockBegin => {
                    let tag = self.expect_name()?;
                    if end_tags.contains(&tag.as_str()) {
                        return Ok((nodes, Some(tag)));
                    }
                    nodes.push(self.parse_tag(&tag)?);
                }
                other => {
                    return Err(self.error(format!("unexpected {}", other.describe())));
                }
            }
        }

        if end_tags.is_empty() {
            Ok((nodes, None))
        } else {
            Err(self.error(format!(
                "unexpected end of template, expected one of: {}",
                end_tags.join(", ")
            )))
        }
    }

    fn parse_tag(&mut self, tag: &str) -> JsqlResult<Node> {
        match tag {
            "if" => self.parse_if(),
            "for" => self.parse_for(),
            "set" => self.parse_set(),
            other => Err(self.error(format!("unknown tag '{other}'"))),
        }
    }

    fn parse_if(&mut self) -> JsqlResult<Node> {
        let mut branches = Vec::new();
        let mut cond = self.parse_expr()?;
        self.expect(&TokenKind::BlockEnd)?;

        loop {
            let (body, end) = self.parse_nodes(&["elif", "else", "endif"])?;
            branches.push((cond, body));
            match end.as_deref() {
                Some("elif") => {
                    cond = self.parse_expr()?;
                    self.expect(&TokenKind::BlockEnd)?;
                }
                Some("else") => {
                    self.expect(&TokenKind::BlockEnd)?;
                    let (else_body, _) = self.parse_nodes(&["endif"])?;
                    self.expect(&TokenKind::BlockEnd)?;
                    return Ok(Node::If {
                        branches,
                        else_body,
                    });
                }
                _ => {
                    self.expect(&TokenKind::BlockEnd)?;
                    return Ok(Node::If {
                        branches,
                        else_body: Vec::new(),
                    });
                }
            }
        }
    }

    fn parse_for(&mut self) -> JsqlResult<Node> {
        let mut targets = vec![self.expect_name()?];
        while self.skip_if(&TokenKind::Comma) {
            targets.push(self.expect_name()?);
        }
        if !self.at_name("in") {
            return Err(self.error("expected 'in' in for tag"));
        }
        self.pos += 1;
        let iter = self.parse_expr()?;
        self.expect(&TokenKind::BlockEnd)?;

        let (body, end) = self.parse_nodes(&["else", "endfor"])?;
        let else_body = if end.as_deref() == Some("else") {
            self.expect(&TokenKind::BlockEnd)?;
            self.parse_nodes(&["endfor"])?.0
        } else {
            Vec::new()
        };
        self.expect(&TokenKind::BlockEnd)?;

        Ok(Node::For {
            targets,
            iter,
            body,
            else_body,
        })
    }

    fn parse_set(&mut self) -> JsqlResult<Node> {
        let name = self.expect_name()?;
        self.expect(&TokenKind::Assign)?;
        let value = self.parse_expr()?;
        self.expect(&TokenKind::BlockEnd)?;
        Ok(Node::Set { name, value })
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn parse_expr(&mut self) -> JsqlResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> JsqlResult<Expr> {
        let mut left = self.parse_and()?;
        while self.at_name("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Binary(BinOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> JsqlResult<Expr> {
        let mut left = self.parse_not()?;
        while self.at_name("and") {
            self.pos += 1;
            let right = self.parse_not()?;
            left = Expr::Binary(BinOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> JsqlResult<Expr> {
        if self.at_name("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_not()?)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> JsqlResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Eq) => BinOp::Eq,
                Some(TokenKind::Ne) => BinOp::Ne,
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::Le) => BinOp::Le,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::Ge) => BinOp::Ge,
                Some(TokenKind::Name(n)) if n == "in" => BinOp::In,
                Some(TokenKind::Name(n))
                    if n == "not"
                        && matches!(self.peek_at(1), Some(TokenKind::Name(m)) if m == "in") =>
                {
                    BinOp::NotIn
                }
                _ => return Ok(left),
            };
            self.pos += if op == BinOp::NotIn { 2 } else { 1 };
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> JsqlResult<Expr> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Add) => BinOp::Add,
                Some(TokenKind::Sub) => BinOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_concat()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_concat(&mut self) -> JsqlResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        while self.skip_if(&TokenKind::Tilde) {
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(BinOp::Concat, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> JsqlResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Mul) => BinOp::Mul,
                Some(TokenKind::Div) => BinOp::Div,
                Some(TokenKind::Mod) => BinOp::Mod,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> JsqlResult<Expr> {
        if self.skip_if(&TokenKind::Sub) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        let expr = self.parse_postfix()?;
        self.parse_filters(expr)
    }

    fn parse_filters(&mut self, mut expr: Expr) -> JsqlResult<Expr> {
        while self.skip_if(&TokenKind::Pipe) {
            let name = self.expect_name()?;
            let args = if self.skip_if(&TokenKind::LParen) {
                self.parse_args(&TokenKind::RParen)?
            } else if self.skip_if(&TokenKind::Colon) {
                vec![self.parse_postfix()?]
            } else {
                Vec::new()
            };
            expr = Expr::Filter {
                expr: Box::new(expr),
                name,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_postfix(&mut self) -> JsqlResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(TokenKind::Dot) => {
                    self.pos += 1;
                    expr = match self.next() {
                        Some(TokenKind::Name(attr)) => Expr::Getattr(Box::new(expr), attr),
                        Some(TokenKind::Integer(idx)) => Expr::Getitem(
                            Box::new(expr),
                            Box::new(Expr::Literal(Literal::Integer(idx))),
                        ),
                        _ => return Err(self.error("expected attribute name after '.'")),
                    };
                }
                Some(TokenKind::LBracket) => {
                    self.pos += 1;
                    let key = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    expr = Expr::Getitem(Box::new(expr), Box::new(key));
                }
                Some(TokenKind::LParen) => {
                    self.pos += 1;
                    let args = self.parse_args(&TokenKind::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Parses a comma-separated argument list up to and including `close`.
    fn parse_args(&mut self, close: &TokenKind) -> JsqlResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.skip_if(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            if self.skip_if(close) {
                return Ok(args);
            }
            self.expect(&TokenKind::Comma)?;
            // Trailing comma
            if self.skip_if(close) {
                return Ok(args);
            }
        }
    }

    fn parse_primary(&mut self) -> JsqlResult<Expr> {
        let Some(kind) = self.next() else {
            return Err(self.error("expected an expression, found end of template"));
        };
        match kind {
            TokenKind::Name(name) => Ok(match name.as_str() {
                "true" | "True" => Expr::Literal(Literal::Bool(true)),
                "false" | "False" => Expr::Literal(Literal::Bool(false)),
                "none" | "None" => Expr::Literal(Literal::None),
                _ => Expr::Name(name),
            }),
            TokenKind::Str(s) => Ok(Expr::Literal(Literal::Str(s))),
            TokenKind::Integer(i) => Ok(Expr::Literal(Literal::Integer(i))),
            TokenKind::Float(f) => Ok(Expr::Literal(Literal::Float(f))),
            TokenKind::LParen => {
                if self.peek() == Some(&TokenKind::RParen) {
                    return Err(self.error("expected an expression, found ')'"));
                }
                let expr = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            TokenKind::LBracket => Ok(Expr::List(self.parse_args(&TokenKind::RBracket)?)),
            other => {
                self.pos -= 1;
                Err(self.error(format!("expected an expression, found {}", other.describe())))
            }
        }
    }
}
