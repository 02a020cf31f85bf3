//! Config script compiler
//!
//! Feed configuration is written in a small Starlark-shaped declaration
//! language. Compiling a script only parses and validates it; nothing in
//! the script is executed.
//!
//! # Accepted language
//!
//! - `NAME = value` constant bindings (strings, ints, `True`/`False`/`None`,
//!   lists, references to earlier names)
//! - `def NAME(params):` callables whose bodies are kept verbatim
//! - `feed(url=..., ...)` declarations with keyword arguments only
//!
//! # Example
//!
//! ```
//! use feedwarden::script::{ConfigCompiler, ScriptCompiler};
//!
//! let src = r#"
//! def short(item):
//!     return item.title
//!
//! feed(url = "https://example.com/feed.json", title = "Example", format = short)
//! "#;
//!
//! let parsed = ScriptCompiler::new().compile(src).unwrap();
//! assert_eq!(parsed.feeds.len(), 1);
//! assert_eq!(parsed.feeds[0].format.as_ref().unwrap().name, "short");
//! ```

pub mod lexer;
pub mod parser;

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Name used for positions in compile errors
pub const SCRIPT_NAME: &str = "config.star";

// ============================================================================
// Compile Output
// ============================================================================

/// A `def` declared in the script. The body is opaque text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Callable {
    pub name: String,
    pub params: Vec<String>,
    pub body: String,
}

/// One `feed(...)` declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedDecl {
    pub url: String,
    pub title: String,
    pub message_thread_id: Option<i64>,
    pub block_rule: Option<Callable>,
    pub keep_rule: Option<Callable>,
    pub format: Option<Callable>,
    pub digest: bool,
    pub always_send_new_items: bool,
    /// Script line of the declaration
    pub line: usize,
}

impl FeedDecl {
    /// Declaration with only a URL set
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: String::new(),
            message_thread_id: None,
            block_rule: None,
            keep_rule: None,
            format: None,
            digest: false,
            always_send_new_items: false,
            line: 0,
        }
    }

    /// Title, falling back to the URL
    pub fn display_name(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Result of compiling a script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParsedConfig {
    /// Feeds in declaration order
    pub feeds: Vec<FeedDecl>,
}

impl ParsedConfig {
    pub fn feed(&self, url: &str) -> Option<&FeedDecl> {
        self.feeds.iter().find(|f| f.url == url)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A script that failed to compile
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct CompileError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, col: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            col,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCRIPT_NAME}:{}:{}: {}", self.line, self.col, self.message)
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// Turns script text into feed declarations.
///
/// Implementations must not have side effects: a rejected script leaves no
/// trace, an accepted one only produces a value.
pub trait ConfigCompiler: Send + Sync {
    fn compile(&self, src: &str) -> Result<ParsedConfig, CompileError>;
}

/// The built-in compiler for the declaration language
#[derive(Debug, Clone, Copy, Default)]
pub struct ScriptCompiler;

impl ScriptCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl ConfigCompiler for ScriptCompiler {
    fn compile(&self, src: &str) -> Result<ParsedConfig, CompileError> {
        parser::Parser::new(src).parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_has_position() {
        let err = CompileError::new(3, 7, "unknown function bar");
        assert_eq!(err.to_string(), "config.star:3:7: unknown function bar");
    }

    #[test]
    fn test_display_name_falls_back_to_url() {
        let mut decl = FeedDecl::new("https://a.example/feed");
        assert_eq!(decl.display_name(), "https://a.example/feed");
        decl.title = "A".into();
        assert_eq!(decl.display_name(), "A");
    }

    #[test]
    fn test_empty_script_is_valid() {
        let parsed = ScriptCompiler::new().compile("").unwrap();
        assert!(parsed.feeds.is_empty());

        let parsed = ScriptCompiler::new().compile("# only a comment\n\n").unwrap();
        assert!(parsed.feeds.is_empty());
    }
}
