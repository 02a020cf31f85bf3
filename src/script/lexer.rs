//! Tokenizer for config scripts

use std::fmt;

use super::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Equals,
    Colon,
    Minus,
    /// End of a logical line (newline outside brackets, or `;`)
    Newline,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "identifier {name}"),
            Self::Str(_) => f.write_str("string literal"),
            Self::Int(_) => f.write_str("int literal"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBracket => f.write_str("'['"),
            Self::RBracket => f.write_str("']'"),
            Self::Comma => f.write_str("','"),
            Self::Equals => f.write_str("'='"),
            Self::Colon => f.write_str("':'"),
            Self::Minus => f.write_str("'-'"),
            Self::Newline => f.write_str("newline"),
            Self::Eof => f.write_str("end of file"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

/// Pull-based lexer.
///
/// Newlines inside `()` or `[]` are insignificant. A statement may not start
/// indented; indented lines are only legal as the body of a `def`, which the
/// parser takes raw through [`Lexer::take_block`]. A `lambda` body is taken
/// raw through [`Lexer::take_inline_expr`].
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    col: usize,
    depth: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            col: 1,
            depth: 0,
            at_line_start: true,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, CompileError> {
        loop {
            let leading_blank = self.skip_blanks();

            let Some(c) = self.peek_char() else {
                return Ok(self.token(TokenKind::Eof, self.line, self.col));
            };

            if c == '#' {
                self.skip_comment();
                continue;
            }

            if c == '\n' {
                self.bump();
                if self.depth > 0 {
                    continue;
                }
                let was_line_start = self.at_line_start;
                self.at_line_start = true;
                if was_line_start {
                    // blank line
                    continue;
                }
                return Ok(self.token(TokenKind::Newline, self.line - 1, 0));
            }

            if self.at_line_start && self.depth == 0 && leading_blank {
                return Err(self.error_here("unexpected indent"));
            }
            self.at_line_start = false;

            let (line, col) = (self.line, self.col);
            let kind = match c {
                '(' => self.single(TokenKind::LParen, 1),
                ')' => self.single(TokenKind::RParen, -1),
                '[' => self.single(TokenKind::LBracket, 1),
                ']' => self.single(TokenKind::RBracket, -1),
                ',' => self.single(TokenKind::Comma, 0),
                '=' => self.single(TokenKind::Equals, 0),
                ':' => self.single(TokenKind::Colon, 0),
                '-' => self.single(TokenKind::Minus, 0),
                ';' => {
                    self.bump();
                    TokenKind::Newline
                }
                '"' | '\'' => self.string(c)?,
                c if c.is_ascii_digit() => self.int()?,
                c if c.is_alphabetic() || c == '_' => self.ident(),
                other => {
                    return Err(self.error_here(format!("unexpected character {other:?}")));
                }
            };
            return Ok(self.token(kind, line, col));
        }
    }

    /// Consume the body of a `def` right after its `:`.
    ///
    /// A body on the same line runs to the end of that line. Otherwise the
    /// body is every following line that is blank or indented. The text is
    /// returned verbatim without the trailing newline and the lexer is left
    /// at the start of the next statement.
    pub fn take_block(&mut self) -> Result<String, CompileError> {
        let rest_start = self.pos;
        let line_end = self.src[rest_start..]
            .find('\n')
            .map_or(self.src.len(), |i| rest_start + i);
        let rest = &self.src[rest_start..line_end];
        let inline = strip_comment(rest).trim();

        if !inline.is_empty() {
            self.advance_to(line_end);
            self.consume_newline();
            return Ok(inline.to_string());
        }

        self.advance_to(line_end);
        self.consume_newline();

        let body_start = self.pos;
        let mut body_end = self.pos;
        while self.pos < self.src.len() {
            let start = self.pos;
            let end = self.src[start..]
                .find('\n')
                .map_or(self.src.len(), |i| start + i);
            let text = &self.src[start..end];
            let indented = text.starts_with(' ') || text.starts_with('\t');
            if !indented && !text.trim().is_empty() {
                break;
            }
            if indented && !text.trim().is_empty() {
                body_end = end;
            }
            self.advance_to(end);
            self.consume_newline();
        }

        if body_end == body_start {
            return Err(self.error_here("expected an indented block"));
        }

        // Trailing blank lines are not part of the body
        let body = self.src[body_start..body_end]
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(body)
    }

    /// Consume a `lambda` body right after its `:`.
    ///
    /// The body runs up to the first `,`, `)` or `]` outside its own brackets
    /// and string literals; at the top level a line end closes it as well.
    /// Comments are dropped and line breaks become spaces. The terminator is
    /// left in place for the next token.
    pub fn take_inline_expr(&mut self) -> Result<String, CompileError> {
        let (line, col) = (self.line, self.col);
        let mut body = String::new();
        let mut nested = 0usize;
        let mut quote: Option<(char, usize, usize)> = None;

        while let Some(c) = self.peek_char() {
            if let Some((q, q_line, q_col)) = quote {
                if c == '\n' {
                    return Err(CompileError::new(q_line, q_col, "unterminated string literal"));
                }
                self.bump();
                body.push(c);
                if c == '\\' {
                    if let Some(escaped) = self.bump() {
                        body.push(escaped);
                    }
                } else if c == q {
                    quote = None;
                }
                continue;
            }

            match c {
                '#' => {
                    self.skip_comment();
                    continue;
                }
                '"' | '\'' => quote = Some((c, self.line, self.col)),
                '(' | '[' | '{' => nested += 1,
                ')' | ']' | '}' if nested > 0 => nested -= 1,
                ',' | ')' | ']' | ';' if nested == 0 => break,
                '\n' if nested == 0 && self.depth == 0 => break,
                _ => {}
            }
            self.bump();
            if c == '\n' {
                body.push(' ');
                self.skip_blanks();
            } else if c != '\r' {
                body.push(c);
            }
        }

        if let Some((_, q_line, q_col)) = quote {
            return Err(CompileError::new(q_line, q_col, "unterminated string literal"));
        }
        if nested > 0 {
            return Err(self.error_here("unclosed bracket in lambda body"));
        }
        let body = body.trim();
        if body.is_empty() {
            return Err(CompileError::new(line, col, "expected an expression after lambda"));
        }
        Ok(body.to_string())
    }

    fn token(&self, kind: TokenKind, line: usize, col: usize) -> Token {
        Token { kind, line, col }
    }

    fn error_here(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(self.line, self.col, message)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn advance_to(&mut self, target: usize) {
        while self.pos < target {
            if self.bump().is_none() {
                break;
            }
        }
    }

    fn consume_newline(&mut self) {
        if self.peek_char() == Some('\n') {
            self.bump();
        }
        self.at_line_start = true;
    }

    /// Skip spaces, tabs and carriage returns; report whether any were seen
    fn skip_blanks(&mut self) -> bool {
        let mut seen = false;
        while let Some(c) = self.peek_char() {
            if c == ' ' || c == '\t' || c == '\r' {
                self.bump();
                seen = true;
            } else {
                break;
            }
        }
        seen
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn single(&mut self, kind: TokenKind, depth_delta: i32) -> TokenKind {
        self.bump();
        match depth_delta {
            1 => self.depth += 1,
            -1 => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        kind
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, CompileError> {
        let (line, col) = (self.line, self.col);
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(CompileError::new(line, col, "unterminated string literal"));
                }
                Some(c) if c == quote => break,
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('\'') => '\'',
                        Some(other) => {
                            return Err(self.error_here(format!("invalid escape sequence \\{other}")));
                        }
                        None => {
                            return Err(CompileError::new(line, col, "unterminated string literal"));
                        }
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
        Ok(TokenKind::Str(value))
    }

    fn int(&mut self) -> Result<TokenKind, CompileError> {
        let (line, col) = (self.line, self.col);
        let start = self.pos;
        while matches!(self.peek_char(), Some(c) if c.is_ascii_digit()) {
            self.bump();
        }
        if matches!(self.peek_char(), Some(c) if c.is_alphabetic() || c == '_') {
            return Err(self.error_here("invalid int literal"));
        }
        self.src[start..self.pos]
            .parse::<i64>()
            .map(TokenKind::Int)
            .map_err(|_| CompileError::new(line, col, "int literal out of range"))
    }

    fn ident(&mut self) -> TokenKind {
        let start = self.pos;
        while matches!(self.peek_char(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        TokenKind::Ident(self.src[start..self.pos].to_string())
    }
}

fn strip_comment(text: &str) -> &str {
    // Bodies are opaque; a '#' inside a string literal is kept as-is
    let mut quote = None;
    for (i, c) in text.char_indices() {
        match (quote, c) {
            (None, '#') => return &text[..i],
            (None, '"' | '\'') => quote = Some(c),
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    text
}
