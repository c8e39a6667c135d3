//! Template lexer (tokenizer).
//!
//! Converts raw template source text into a flat stream of [`Token`]s. Literal
//! text becomes [`TokenKind::Data`]; each `{{ ... }}` becomes a
//! [`TokenKind::VariableBegin`], the expression tokens inside it, and a
//! [`TokenKind::VariableEnd`]; `{% ... %}` is bracketed the same way with
//! block tokens. Comments (`{# ... #}`) produce nothing.
//!
//! Whitespace control follows the usual convention: a `-` just inside an
//! opening delimiter (`{{-`, `{%-`, `{#-`) strips trailing whitespace from the
//! preceding text, and one just inside a closing delimiter (`-}}`, `-%}`,
//! `-#}`) strips leading whitespace from the following text.

use jsql_core::error::{JsqlError, JsqlResult};

/// The kind of a [`Token`], with its payload where there is one.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Literal template text, emitted verbatim.
    Data(String),
    /// `{{`
    VariableBegin,
    /// `}}`
    VariableEnd,
    /// `{%`
    BlockBegin,
    /// `%}`
    BlockEnd,
    /// An identifier or keyword.
    Name(String),
    /// A string literal, escapes already resolved.
    Str(String),
    /// An integer literal.
    Integer(i64),
    /// A float literal.
    Float(f64),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// `,`
    Comma,
    /// `.`
    Dot,
    /// `|`
    Pipe,
    /// `:`
    Colon,
    /// `~`
    Tilde,
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=`
    Assign,
}

impl TokenKind {
    /// Short human-readable description used in syntax errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Data(_) => "template data".to_string(),
            Self::VariableBegin => "'{{'".to_string(),
            Self::VariableEnd => "'}}'".to_string(),
            Self::BlockBegin => "'{%'".to_string(),
            Self::BlockEnd => "'%}'".to_string(),
            Self::Name(n) => format!("name '{n}'"),
            Self::Str(s) => format!("string '{s}'"),
            Self::Integer(i) => format!("integer {i}"),
            Self::Float(f) => format!("float {f}"),
            other => format!("'{}'", other.operator_str()),
        }
    }

    const fn operator_str(&self) -> &'static str {
        match self {
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::Comma => ",",
            Self::Dot => ".",
            Self::Pipe => "|",
            Self::Colon => ":",
            Self::Tilde => "~",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Assign => "=",
            _ => "?",
        }
    }
}

/// A token produced by the template lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// 1-based line on which the token starts.
    pub lineno: usize,
    /// What the token is.
    pub kind: TokenKind,
}

impl Token {
    /// Creates a token.
    pub const fn new(lineno: usize, kind: TokenKind) -> Self {
        Self { lineno, kind }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TagType {
    Variable,
    Block,
    Comment,
}

/// Tokenizes a template source string into a flat sequence of [`Token`]s.
///
/// # Errors
///
/// Returns a `TemplateSyntaxError` if a tag, comment, or string literal is
/// never closed, or if an expression contains a character the expression
/// grammar does not know.
///
/// # Examples
///
/// ```
/// use jsql_template::lexer::{tokenize, TokenKind};
///
/// let tokens = tokenize("select {{ col }}").unwrap();
/// let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
/// assert_eq!(
///     kinds,
///     vec![
///         TokenKind::Data("select ".into()),
///         TokenKind::VariableBegin,
///         TokenKind::Name("col".into()),
///         TokenKind::VariableEnd,
///     ]
/// );
/// ```
pub fn tokenize(source: &str) -> JsqlResult<Vec<Token>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    lineno: usize,
    lstrip_next: bool,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    const fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            lineno: 1,
            lstrip_next: false,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> JsqlResult<Vec<Token>> {
        while self.pos < self.src.len() {
            let rest = &self.src[self.pos..];
            match find_next_open(rest) {
                None => {
                    self.push_data(rest, false);
                    self.pos = self.src.len();
                }
                Some((offset, tag_type)) => {
                    let strip_before = rest[offset + 2..].starts_with('-');
                    self.push_data(&rest[..offset], strip_before);
                    self.pos += offset + 2;
                    if strip_before {
                        self.pos += 1;
                    }
                    match tag_type {
                        TagType::Comment => self.skip_comment()?,
                        TagType::Variable => self.lex_tag(TagType::Variable)?,
                        TagType::Block => self.lex_tag(TagType::Block)?,
                    }
                }
            }
        }
        Ok(self.tokens)
    }

    fn push_data(&mut self, text: &str, rstrip: bool) {
        let start_line = self.lineno;
        self.lineno += count_newlines(text);

        let mut text = text;
        if std::mem::take(&mut self.lstrip_next) {
            text = text.trim_start();
        }
        if rstrip {
            text = text.trim_end();
        }
        if !text.is_empty() {
            self.tokens
                .push(Token::new(start_line, TokenKind::Data(text.to_string())));
        }
    }

    fn skip_comment(&mut self) -> JsqlResult<()> {
        let rest = &self.src[self.pos..];
        let end = rest.find("#}").ok_or_else(|| {
            JsqlError::TemplateSyntaxError(format!(
                "line {}: unclosed comment, expected '#}}'",
                self.lineno
            ))
        })?;
        self.lstrip_next = rest[..end].ends_with('-');
        self.lineno += count_newlines(&rest[..end]);
        self.pos += end + 2;
        Ok(())
    }

    fn lex_tag(&mut self, tag_type: TagType) -> JsqlResult<()> {
        let (begin, end, closer) = match tag_type {
            TagType::Variable => (TokenKind::VariableBegin, TokenKind::VariableEnd, "}}"),
            _ => (TokenKind::BlockBegin, TokenKind::BlockEnd, "%}"),
        };
        let open_line = self.lineno;
        self.tokens.push(Token::new(open_line, begin));

        loop {
            self.skip_whitespace();
            let rest = &self.src[self.pos..];
            if rest.is_empty() {
                return Err(JsqlError::TemplateSyntaxError(format!(
                    "line {open_line}: unclosed tag, expected '{closer}'"
                )));
            }
            if rest.starts_with(closer) {
                self.tokens.push(Token::new(self.lineno, end));
                self.pos += 2;
                return Ok(());
            }
            if rest.starts_with('-') && rest[1..].starts_with(closer) {
                self.tokens.push(Token::new(self.lineno, end));
                self.pos += 3;
                self.lstrip_next = true;
                return Ok(());
            }
            self.lex_expression_token()?;
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = &self.src[self.pos..];
        let trimmed = rest.trim_start();
        let skipped = rest.len() - trimmed.len();
        self.lineno += count_newlines(&rest[..skipped]);
        self.pos += skipped;
    }

    fn lex_expression_token(&mut self) -> JsqlResult<()> {
        let rest = &self.src[self.pos..];
        let mut chars = rest.chars();
        let Some(c) = chars.next() else {
            return Ok(());
        };
        let lineno = self.lineno;

        if c.is_ascii_alphabetic() || c == '_' {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            self.tokens
                .push(Token::new(lineno, TokenKind::Name(rest[..len].to_string())));
            self.pos += len;
            return Ok(());
        }

        if c.is_ascii_digit() {
            return self.lex_number();
        }

        if c == '\'' || c == '"' {
            return self.lex_string(c);
        }

        let two = rest.get(..2).unwrap_or("");
        let (kind, len) = match two {
            "==" => (TokenKind::Eq, 2),
            "!=" => (TokenKind::Ne, 2),
            "<=" => (TokenKind::Le, 2),
            ">=" => (TokenKind::Ge, 2),
            _ => {
                let kind = match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    '.' => TokenKind::Dot,
                    '|' => TokenKind::Pipe,
                    ':' => TokenKind::Colon,
                    '~' => TokenKind::Tilde,
                    '+' => TokenKind::Add,
                    '-' => TokenKind::Sub,
                    '*' => TokenKind::Mul,
                    '/' => TokenKind::Div,
                    '%' => TokenKind::Mod,
                    '<' => TokenKind::Lt,
                    '>' => TokenKind::Gt,
                    '=' => TokenKind::Assign,
                    other => {
                        return Err(JsqlError::TemplateSyntaxError(format!(
                            "line {lineno}: unexpected character '{other}'"
                        )))
                    }
                };
                (kind, 1)
            }
        };
        self.tokens.push(Token::new(lineno, kind));
        self.pos += len;
        Ok(())
    }

    fn lex_number(&mut self) -> JsqlResult<()> {
        let rest = &self.src[self.pos..];
        let int_len = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());

        // `items.0.1` is attribute access, never a float.
        let after_dot = matches!(
            self.tokens.last(),
            Some(Token {
                kind: TokenKind::Dot,
                ..
            })
        );
        let frac_len = if after_dot || !rest[int_len..].starts_with('.') {
            0
        } else {
            let frac = &rest[int_len + 1..];
            let digits = frac
                .find(|ch: char| !ch.is_ascii_digit())
                .unwrap_or(frac.len());
            if digits == 0 {
                0
            } else {
                digits + 1
            }
        };

        let literal = &rest[..int_len + frac_len];
        let kind = if frac_len > 0 {
            literal.parse::<f64>().map(TokenKind::Float).map_err(|e| {
                JsqlError::TemplateSyntaxError(format!(
                    "line {}: invalid float literal '{literal}': {e}",
                    self.lineno
                ))
            })?
        } else {
            literal.parse::<i64>().map(TokenKind::Integer).map_err(|e| {
                JsqlError::TemplateSyntaxError(format!(
                    "line {}: invalid integer literal '{literal}': {e}",
                    self.lineno
                ))
            })?
        };
        self.tokens.push(Token::new(self.lineno, kind));
        self.pos += literal.len();
        Ok(())
    }

    fn lex_string(&mut self, quote: char) -> JsqlResult<()> {
        let start_line = self.lineno;
        let body = &self.src[self.pos + 1..];
        let mut value = String::new();
        let mut chars = body.char_indices();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        other => value.push(other),
                    }
                    if escaped == '\n' {
                        self.lineno += 1;
                    }
                }
                c if c == quote => {
                    self.tokens.push(Token::new(start_line, TokenKind::Str(value)));
                    self.pos += 1 + idx + c.len_utf8();
                    return Ok(());
                }
                c => {
                    if c == '\n' {
                        self.lineno += 1;
                    }
                    value.push(c);
                }
            }
        }

        Err(JsqlError::TemplateSyntaxError(format!(
            "line {start_line}: unterminated string literal"
        )))
    }
}

/// Finds the position and type of the next template tag opening.
fn find_next_open(s: &str) -> Option<(usize, TagType)> {
    let bytes = s.as_bytes();
    let len = bytes.len();
    let mut i = 0;
    while i + 1 < len {
        if bytes[i] == b'{' {
            match bytes[i + 1] {
                b'{' => return Some((i, TagType::Variable)),
                b'%' => return Some((i, TagType::Block)),
                b'#' => return Some((i, TagType::Comment)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}
