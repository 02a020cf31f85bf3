//! HTTP admin surface over the state directory
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │             Admin Server             │
//! │                                      │
//! │  GET/PUT /api/config ──▶ ConfigStore │──┐ run-lock
//! │  GET/PUT /api/state  ──▶ StateStore  │  │ (try, never wait)
//! │  GET/PUT /api/error-template         │  │
//! │  GET     /api/stats, /debug/stats.csv│  ▼
//! │  GET     /api/health           <state_dir>/.run.lock
//! └──────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use feedwarden::admin::{AdminConfig, AdminServer};
//! use feedwarden::script::ScriptCompiler;
//!
//! let config = AdminConfig::builder().state_dir("/var/lib/feedwarden").build()?;
//! let server = AdminServer::new(config, Arc::new(ScriptCompiler::new()))?;
//! server.start_with_shutdown(std::future::pending()).await?;
//! ```

pub mod api;
pub mod config;
pub mod server;

// Re-export main types
pub use api::{create_router, ApiError};
pub use config::AdminConfig;
pub use server::{AdminServer, AppState, ServerError};
