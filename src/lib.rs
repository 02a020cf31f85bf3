//! feedwarden - scheduled feed fetcher with an HTTP admin surface
//!
//! A run fetches every feed declared in a script-based configuration,
//! remembers what was already delivered, and leaves one statistics record
//! behind. An admin server exposes the configuration, the dedup state, the
//! error template and the statistics over HTTP.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`script`] - Config script compiler (declarations only, nothing executes)
//! - [`storage`] - State directory: documents, run-lock, stats records
//! - [`fetcher`] - The run: fetch, dedup, deliver, persist
//! - [`admin`] - HTTP admin API
//! - [`models`] - Core data structures and types
//! - [`error`] - Unified error type
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedwarden::admin::AdminServer;
//! use feedwarden::config::Config;
//! use feedwarden::script::ScriptCompiler;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let server = AdminServer::new(config.admin_config()?, Arc::new(ScriptCompiler::new()))?;
//!     server
//!         .start_with_shutdown(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod script;
pub mod storage;

/// User agent sent with every outgoing request
pub const USER_AGENT: &str = concat!("feedwarden/", env!("CARGO_PKG_VERSION"));

/// Re-export commonly used types
pub mod prelude {
    pub use crate::admin::{AdminConfig, AdminServer};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result};
    pub use crate::fetcher::{FeedSource, Fetcher, FetcherSettings, Notifier};
    pub use crate::models::{FeedItem, FetchOutcome};
    pub use crate::script::{ConfigCompiler, FeedDecl, ParsedConfig, ScriptCompiler};
    pub use crate::storage::{LocalStore, RemoteStore, StateDir, Store};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
