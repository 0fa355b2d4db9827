//! Tokenizer shared by the query and boolean expression sublanguages.
//!
//! Both languages use the same lexical grammar; each parser accepts the
//! subset of tokens it understands and rejects the rest as syntax errors.

use crate::error::ExpressionError;
use std::fmt;

/// Kind of a lexical token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Ident(String),
    Str(String),
    /// Backtick-quoted text.
    Quoted(String),
    Num(f64),
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Question,
    Colon,
    /// `=`
    Assign,
    /// `==`
    EqEq,
    /// `===`
    EqEqEq,
    /// `!=`
    NotEq,
    /// `!==`
    NotEqEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(name) => write!(f, "identifier '{}'", name),
            TokenKind::Str(s) => write!(f, "string '{}'", s),
            TokenKind::Quoted(s) => write!(f, "`{}`", s),
            TokenKind::Num(n) => write!(f, "number {}", n),
            TokenKind::Dot => f.write_str("'.'"),
            TokenKind::Comma => f.write_str("','"),
            TokenKind::LParen => f.write_str("'('"),
            TokenKind::RParen => f.write_str("')'"),
            TokenKind::LBracket => f.write_str("'['"),
            TokenKind::RBracket => f.write_str("']'"),
            TokenKind::Question => f.write_str("'?'"),
            TokenKind::Colon => f.write_str("':'"),
            TokenKind::Assign => f.write_str("'='"),
            TokenKind::EqEq => f.write_str("'=='"),
            TokenKind::EqEqEq => f.write_str("'==='"),
            TokenKind::NotEq => f.write_str("'!='"),
            TokenKind::NotEqEq => f.write_str("'!=='"),
            TokenKind::Lt => f.write_str("'<'"),
            TokenKind::Le => f.write_str("'<='"),
            TokenKind::Gt => f.write_str("'>'"),
            TokenKind::Ge => f.write_str("'>='"),
            TokenKind::AndAnd => f.write_str("'&&'"),
            TokenKind::OrOr => f.write_str("'||'"),
            TokenKind::Bang => f.write_str("'!'"),
            TokenKind::Plus => f.write_str("'+'"),
            TokenKind::Minus => f.write_str("'-'"),
            TokenKind::Star => f.write_str("'*'"),
            TokenKind::Slash => f.write_str("'/'"),
            TokenKind::Percent => f.write_str("'%'"),
            TokenKind::Eof => f.write_str("end of input"),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Splits `src` into tokens. The last token is always [`TokenKind::Eof`].
pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut lexer = Lexer {
        src,
        chars: src.char_indices().peekable(),
    };
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn next_token(&mut self) -> Result<Token, ExpressionError> {
        self.skip_trivia()?;

        let Some((offset, c)) = self.chars.next() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset: self.src.len(),
            });
        };

        let kind = match c {
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '?' => TokenKind::Question,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::EqEqEq
                    } else {
                        TokenKind::EqEq
                    }
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        TokenKind::NotEqEq
                    } else {
                        TokenKind::NotEq
                    }
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(ExpressionError::syntax(offset, "Unexpected character '&'"));
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    return Err(ExpressionError::syntax(offset, "Unexpected character '|'"));
                }
            }
            '"' | '\'' => TokenKind::Str(self.string(offset, c)?),
            '`' => TokenKind::Quoted(self.string(offset, '`')?),
            c if c.is_ascii_digit() => self.number(offset)?,
            c if is_ident_start(c) => {
                let mut end = offset + c.len_utf8();
                while let Some(&(i, c)) = self.chars.peek() {
                    if !is_ident_continue(c) {
                        break;
                    }
                    end = i + c.len_utf8();
                    self.chars.next();
                }
                TokenKind::Ident(self.src[offset..end].to_string())
            }
            other => {
                return Err(ExpressionError::syntax(
                    offset,
                    format!("Unexpected character '{}'", other),
                ))
            }
        };

        Ok(Token { kind, offset })
    }

    fn eat(&mut self, expected: char) -> bool {
        if matches!(self.chars.peek(), Some(&(_, c)) if c == expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next().map(|(_, c)| c)
    }

    /// Skips whitespace, `// line` and `/* block */` comments.
    fn skip_trivia(&mut self) -> Result<(), ExpressionError> {
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else if c == '/' && self.peek_second() == Some('/') {
                for (_, c) in self.chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            } else if c == '/' && self.peek_second() == Some('*') {
                self.chars.next();
                self.chars.next();
                let mut closed = false;
                while let Some((_, c)) = self.chars.next() {
                    if c == '*' && self.eat('/') {
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(ExpressionError::syntax(offset, "Unterminated comment"));
                }
            } else {
                break;
            }
        }
        Ok(())
    }

    fn string(&mut self, start: usize, quote: char) -> Result<String, ExpressionError> {
        let mut out = String::new();
        while let Some((offset, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(out),
                '\\' => {
                    let Some((_, escaped)) = self.chars.next() else {
                        break;
                    };
                    match escaped {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        '0' => out.push('\0'),
                        'u' => out.push(self.unicode_escape(offset)?),
                        other => out.push(other),
                    }
                }
                c => out.push(c),
            }
        }
        Err(ExpressionError::syntax(start, "Unterminated string literal"))
    }

    fn unicode_escape(&mut self, offset: usize) -> Result<char, ExpressionError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .chars
                .next()
                .and_then(|(_, c)| c.to_digit(16))
                .ok_or_else(|| ExpressionError::syntax(offset, "Invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| ExpressionError::syntax(offset, "Invalid unicode escape"))
    }

    fn number(&mut self, start: usize) -> Result<TokenKind, ExpressionError> {
        let mut end = start + 1;
        let mut seen_dot = false;
        let mut seen_exp = false;
        while let Some(&(i, c)) = self.chars.peek() {
            let accept = match c {
                '0'..='9' => true,
                '.' if !seen_dot && !seen_exp => {
                    // `1.toString` style member access is not supported; a dot
                    // must be followed by a digit to belong to the number.
                    let next = self.peek_second();
                    if next.is_some_and(|n| n.is_ascii_digit()) {
                        seen_dot = true;
                        true
                    } else {
                        false
                    }
                }
                'e' | 'E' if !seen_exp => {
                    seen_exp = true;
                    true
                }
                '+' | '-' if seen_exp && matches!(&self.src[end - 1..end], "e" | "E") => true,
                _ => false,
            };
            if !accept {
                break;
            }
            end = i + c.len_utf8();
            self.chars.next();
        }
        let text = &self.src[start..end];
        text.parse::<f64>()
            .map(TokenKind::Num)
            .map_err(|_| ExpressionError::syntax(start, format!("Invalid number '{}'", text)))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Deepest nesting a parser accepts. Bounds parser and evaluator recursion.
pub(crate) const MAX_NESTING: usize = 64;

/// Cursor over a token list used by both recursive descent parsers.
pub(crate) struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl TokenStream {
    pub fn new(src: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            tokens: tokenize(src)?,
            pos: 0,
            depth: 0,
        })
    }

    /// Goes one level deeper, failing past [`MAX_NESTING`].
    pub fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ExpressionError::syntax(
                self.offset(),
                "Expression nested too deeply",
            ));
        }
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Returns to a depth saved with [`TokenStream::depth`].
    pub fn restore(&mut self, depth: usize) {
        self.depth = depth;
    }

    pub fn peek(&self) -> &TokenKind {
        &self.current().kind
    }

    pub fn offset(&self) -> usize {
        self.current().offset
    }

    pub fn next(&mut self) -> TokenKind {
        let kind = self.current().kind.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        kind
    }

    /// Consumes the next token if it equals `kind`.
    pub fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.peek() == kind {
            self.next();
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, kind: &TokenKind) -> Result<(), ExpressionError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected {}", kind)))
        }
    }

    pub fn expect_eof(&self) -> Result<(), ExpressionError> {
        if *self.peek() == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.unexpected("expected end of input"))
        }
    }

    pub fn unexpected(&self, context: &str) -> ExpressionError {
        ExpressionError::syntax(
            self.offset(),
            format!("Unexpected {}, {}", self.peek(), context),
        )
    }

    fn current(&self) -> &Token {
        // `tokenize` always ends the list with Eof, so it is never empty.
        &self.tokens[self.pos]
    }
}
