//! Statement parser and validator for config scripts

use std::collections::{HashMap, HashSet};
use std::fmt;

use super::lexer::{Lexer, Token, TokenKind};
use super::{Callable, CompileError, FeedDecl, ParsedConfig};

const FEED_BUILTIN: &str = "feed";
const LAMBDA: &str = "lambda";
const RESERVED: &[&str] = &[FEED_BUILTIN, LAMBDA, "True", "False", "None", "def"];

/// Compile-time value of an expression
#[derive(Debug, Clone, PartialEq)]
enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Function(Callable),
    /// Result of a `feed(...)` call; the declaration is already registered
    Feed(String),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Function(_) => "function",
            Self::Feed(_) => "feed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    Url,
    Title,
    MessageThreadId,
    BlockRule,
    KeepRule,
    Format,
    Digest,
    AlwaysSendNewItems,
}

impl Param {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "url" => Self::Url,
            "title" => Self::Title,
            "message_thread_id" => Self::MessageThreadId,
            "block_rule" => Self::BlockRule,
            "keep_rule" => Self::KeepRule,
            "format" => Self::Format,
            "digest" => Self::Digest,
            "always_send_new_items" => Self::AlwaysSendNewItems,
            _ => return None,
        })
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Url => "url",
            Self::Title => "title",
            Self::MessageThreadId => "message_thread_id",
            Self::BlockRule => "block_rule",
            Self::KeepRule => "keep_rule",
            Self::Format => "format",
            Self::Digest => "digest",
            Self::AlwaysSendNewItems => "always_send_new_items",
        })
    }
}

/// Single-pass parser over a [`Lexer`]
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    peeked: Option<Token>,
    globals: HashMap<String, Value>,
    feeds: Vec<FeedDecl>,
    seen_urls: HashSet<String>,
}

impl<'a> Parser<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            lexer: Lexer::new(src),
            peeked: None,
            globals: HashMap::new(),
            feeds: Vec::new(),
            seen_urls: HashSet::new(),
        }
    }

    pub fn parse(mut self) -> Result<ParsedConfig, CompileError> {
        loop {
            let tok = self.next()?;
            match tok.kind {
                TokenKind::Eof => break,
                TokenKind::Newline => continue,
                TokenKind::Ident(ref name) if name == "def" => {
                    // the body consumes its own line ending
                    self.parse_def(&tok)?;
                    continue;
                }
                TokenKind::Ident(ref name) => {
                    let name = name.clone();
                    let after = self.next()?;
                    match after.kind {
                        TokenKind::Equals => self.parse_binding(&tok, name)?,
                        TokenKind::LParen => {
                            self.parse_call(&tok, &name)?;
                        }
                        ref other => {
                            return Err(error_at(
                                &after,
                                format!("expected '=' or '(' after {name}, got {other}"),
                            ));
                        }
                    }
                }
                ref other => {
                    return Err(error_at(&tok, format!("unexpected {other} at start of statement")));
                }
            }
            self.expect_end_of_statement()?;
        }

        Ok(ParsedConfig { feeds: self.feeds })
    }

    // ------------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------------

    fn parse_binding(&mut self, at: &Token, name: String) -> Result<(), CompileError> {
        self.check_new_global(at, &name)?;
        let value = self.parse_value()?;
        self.globals.insert(name, value);
        Ok(())
    }

    fn parse_def(&mut self, at: &Token) -> Result<(), CompileError> {
        let name_tok = self.next()?;
        let TokenKind::Ident(name) = name_tok.kind.clone() else {
            return Err(error_at(&name_tok, format!("expected function name, got {}", name_tok.kind)));
        };
        self.check_new_global(&name_tok, &name)?;
        self.expect(TokenKind::LParen)?;

        let mut params = Vec::new();
        loop {
            let tok = self.next()?;
            match tok.kind {
                TokenKind::RParen => break,
                TokenKind::Ident(ref param) => {
                    if params.contains(param) {
                        return Err(error_at(&tok, format!("duplicate parameter {param}")));
                    }
                    params.push(param.clone());
                    let sep = self.next()?;
                    match sep.kind {
                        TokenKind::Comma => {}
                        TokenKind::RParen => break,
                        ref other => {
                            return Err(error_at(&sep, format!("expected ',' or ')', got {other}")));
                        }
                    }
                }
                ref other => {
                    return Err(error_at(&tok, format!("expected parameter name, got {other}")));
                }
            }
        }

        self.expect(TokenKind::Colon)?;
        let body = self.lexer.take_block()?;

        tracing::trace!(name = %name, line = at.line, "Parsed def");
        self.globals
            .insert(name.clone(), Value::Function(Callable { name, params, body }));
        Ok(())
    }

    /// Parse the arguments of a call whose `(` was just consumed.
    ///
    /// `feed` is the only callable builtin. Each call registers its
    /// declaration wherever it appears, so `feeds = [feed(...), ...]` and a
    /// bare `feed(...)` statement declare the same thing.
    fn parse_call(&mut self, at: &Token, name: &str) -> Result<Value, CompileError> {
        if name != FEED_BUILTIN {
            return Err(error_at(at, format!("unknown function {name}")));
        }

        let mut args: Vec<(Param, Value, Token)> = Vec::new();
        loop {
            let tok = self.next()?;
            if tok.kind == TokenKind::RParen {
                break;
            }
            let key = match &tok.kind {
                TokenKind::Ident(key) => key.clone(),
                _ => return Err(error_at(&tok, "feed: unexpected positional argument")),
            };
            if !self.peek_is(&TokenKind::Equals)? {
                return Err(error_at(&tok, "feed: unexpected positional argument"));
            }
            self.expect(TokenKind::Equals)?;

            let param = Param::from_name(&key).ok_or_else(|| {
                error_at(&tok, format!("feed: unexpected keyword argument {key:?}"))
            })?;
            if args.iter().any(|(p, _, _)| *p == param) {
                return Err(error_at(
                    &tok,
                    format!("feed: got multiple values for argument {key:?}"),
                ));
            }

            let value = self.parse_value()?;
            args.push((param, value, tok));

            let sep = self.next()?;
            match sep.kind {
                TokenKind::Comma => {}
                TokenKind::RParen => break,
                ref other => {
                    return Err(error_at(&sep, format!("expected ',' or ')', got {other}")));
                }
            }
        }

        let decl = build_feed(at, args)?;
        if !self.seen_urls.insert(decl.url.clone()) {
            return Err(error_at(at, format!("duplicate feed URL {:?}", decl.url)));
        }
        let url = decl.url.clone();
        self.feeds.push(decl);
        Ok(Value::Feed(url))
    }

    /// `lambda a, b: <expr>` with the body kept as opaque text
    fn parse_lambda(&mut self, at: &Token) -> Result<Value, CompileError> {
        let mut params: Vec<String> = Vec::new();
        loop {
            let tok = self.next()?;
            match tok.kind {
                TokenKind::Colon => break,
                TokenKind::Ident(ref param) => {
                    if params.contains(param) {
                        return Err(error_at(&tok, format!("duplicate parameter {param}")));
                    }
                    params.push(param.clone());
                    let sep = self.next()?;
                    match sep.kind {
                        TokenKind::Comma => {}
                        TokenKind::Colon => break,
                        ref other => {
                            return Err(error_at(&sep, format!("expected ',' or ':', got {other}")));
                        }
                    }
                }
                ref other => {
                    return Err(error_at(&tok, format!("expected parameter name, got {other}")));
                }
            }
        }

        let body = self.lexer.take_inline_expr()?;
        tracing::trace!(line = at.line, "Parsed lambda");
        Ok(Value::Function(Callable {
            name: LAMBDA.to_string(),
            params,
            body,
        }))
    }

    fn check_new_global(&self, at: &Token, name: &str) -> Result<(), CompileError> {
        if RESERVED.contains(&name) {
            return Err(error_at(at, format!("cannot reassign builtin {name}")));
        }
        if self.globals.contains_key(name) {
            return Err(error_at(at, format!("cannot reassign global {name}")));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------------

    fn parse_value(&mut self) -> Result<Value, CompileError> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Str(s) => Ok(Value::Str(s)),
            TokenKind::Int(n) => Ok(Value::Int(n)),
            TokenKind::Minus => {
                let num = self.next()?;
                match num.kind {
                    TokenKind::Int(n) => Ok(Value::Int(-n)),
                    ref other => Err(error_at(&num, format!("expected int after '-', got {other}"))),
                }
            }
            TokenKind::LBracket => self.parse_list(),
            TokenKind::Ident(ref name) => match name.as_str() {
                "True" => Ok(Value::Bool(true)),
                "False" => Ok(Value::Bool(false)),
                "None" => Ok(Value::None),
                LAMBDA => self.parse_lambda(&tok),
                _ => {
                    if self.peek_is(&TokenKind::LParen)? {
                        self.next()?;
                        return self.parse_call(&tok, name);
                    }
                    self.globals
                        .get(name)
                        .cloned()
                        .ok_or_else(|| error_at(&tok, format!("undefined: {name}")))
                }
            },
            ref other => Err(error_at(&tok, format!("expected a value, got {other}"))),
        }
    }

    fn parse_list(&mut self) -> Result<Value, CompileError> {
        let mut items = Vec::new();
        loop {
            if self.peek_is(&TokenKind::RBracket)? {
                self.next()?;
                break;
            }
            items.push(self.parse_value()?);
            let sep = self.next()?;
            match sep.kind {
                TokenKind::Comma => {}
                TokenKind::RBracket => break,
                ref other => {
                    return Err(error_at(&sep, format!("expected ',' or ']', got {other}")));
                }
            }
        }
        Ok(Value::List(items))
    }

    // ------------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------------

    fn next(&mut self) -> Result<Token, CompileError> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.lexer.next_token(),
        }
    }

    fn peek_is(&mut self, kind: &TokenKind) -> Result<bool, CompileError> {
        if self.peeked.is_none() {
            self.peeked = Some(self.lexer.next_token()?);
        }
        Ok(self.peeked.as_ref().is_some_and(|t| &t.kind == kind))
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        let tok = self.next()?;
        if tok.kind == kind {
            Ok(tok)
        } else {
            Err(error_at(&tok, format!("expected {kind}, got {}", tok.kind)))
        }
    }

    fn expect_end_of_statement(&mut self) -> Result<(), CompileError> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Newline => Ok(()),
            TokenKind::Eof => {
                self.peeked = Some(tok);
                Ok(())
            }
            ref other => Err(error_at(&tok, format!("expected newline, got {other}"))),
        }
    }
}

fn build_feed(at: &Token, args: Vec<(Param, Value, Token)>) -> Result<FeedDecl, CompileError> {
    let mut decl = FeedDecl::new("");
    decl.line = at.line;
    let mut has_url = false;

    for (param, value, tok) in args {
        let mismatch = |want: &str| {
            error_at(
                &tok,
                format!("feed: for parameter {param}: got {}, want {want}", value.type_name()),
            )
        };
        match param {
            Param::Url => {
                let Value::Str(ref url) = value else {
                    return Err(mismatch("string"));
                };
                decl.url = url.clone();
                has_url = true;
            }
            Param::Title => {
                let Value::Str(ref title) = value else {
                    return Err(mismatch("string"));
                };
                decl.title = title.clone();
            }
            Param::MessageThreadId => match value {
                Value::Int(id) => decl.message_thread_id = Some(id),
                Value::None => {}
                _ => return Err(mismatch("int")),
            },
            Param::BlockRule | Param::KeepRule | Param::Format => {
                let callable = match value {
                    Value::Function(ref f) => Some(f.clone()),
                    Value::None => None,
                    _ => return Err(mismatch("function")),
                };
                match param {
                    Param::BlockRule => decl.block_rule = callable,
                    Param::KeepRule => decl.keep_rule = callable,
                    _ => decl.format = callable,
                }
            }
            Param::Digest | Param::AlwaysSendNewItems => {
                let Value::Bool(flag) = value else {
                    return Err(mismatch("bool"));
                };
                if matches!(param, Param::Digest) {
                    decl.digest = flag;
                } else {
                    decl.always_send_new_items = flag;
                }
            }
        }
    }

    if !has_url {
        return Err(error_at(at, "feed: missing argument for url"));
    }

    match url::Url::parse(&decl.url) {
        Ok(parsed) if !parsed.cannot_be_a_base() => Ok(decl),
        _ => Err(error_at(
            at,
            format!("invalid URL {:?} of feed {:?}", decl.url, decl.title),
        )),
    }
}

fn error_at(tok: &Token, message: impl Into<String>) -> CompileError {
    CompileError::new(tok.line, tok.col, message)
}
