//! Admin server implementation
//!
//! Owns the state directory for the lifetime of the process: the layout is
//! created once in [`AdminServer::new`], before any route exists.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::script::ConfigCompiler;
use crate::storage::{ConfigStore, StateDir, StateStore, StatsAggregator, TemplateStore};

use super::api::create_router;
use super::config::AdminConfig;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// State directory layout
    pub dir: StateDir,

    /// Feed script storage
    pub config_store: ConfigStore,

    /// Dedup state storage
    pub state_store: StateStore,

    /// Error template storage
    pub templates: TemplateStore,

    /// Run statistics
    pub stats: StatsAggregator,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// State over an already initialized directory
    pub fn new(dir: StateDir, compiler: Arc<dyn ConfigCompiler>) -> Self {
        Self {
            config_store: ConfigStore::new(dir.clone(), compiler),
            state_store: StateStore::new(dir.clone()),
            templates: TemplateStore::new(dir.clone()),
            stats: StatsAggregator::new(dir.clone()),
            dir,
            start_time: Instant::now(),
        }
    }
}

// ============================================================================
// Admin Server
// ============================================================================

/// HTTP admin server
pub struct AdminServer {
    config: AdminConfig,
    state: AppState,
}

impl AdminServer {
    /// Create a new admin server, initializing the state directory
    pub fn new(config: AdminConfig, compiler: Arc<dyn ConfigCompiler>) -> Result<Self, ServerError> {
        config
            .validate()
            .map_err(|e| ServerError::ConfigError(e.to_string()))?;

        let dir = StateDir::new(&config.state_dir);
        dir.init().map_err(|e| {
            ServerError::InitError(format!(
                "cannot initialize {}: {}",
                config.state_dir.display(),
                e
            ))
        })?;

        let state = AppState::new(dir, compiler);
        Ok(Self { config, state })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes));

        // Add tracing layer if enabled
        if self.config.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<(), ServerError> {
        let router = self.build_router();
        let addr = self.config.bind_address;

        tracing::info!(%addr, state_dir = %self.config.state_dir.display(), "Starting admin server (with graceful shutdown)");

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| ServerError::ServeError(e.to_string()))?;

        tracing::info!("Admin server shutdown complete");
        Ok(())
    }

    /// Get server info
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            bind_address: self.config.bind_address,
            state_dir: self.config.state_dir.clone(),
            max_body_bytes: self.config.max_body_bytes,
            request_logging_enabled: self.config.enable_request_logging,
        }
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub state_dir: PathBuf,
    pub max_body_bytes: usize,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "Admin Server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             State Directory: {}\n\
             Max Body: {} bytes\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.state_dir.display(),
            self.max_body_bytes,
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}

// ============================================================================
// Server Errors
// ============================================================================

/// Server errors
#[derive(Debug, Clone)]
pub enum ServerError {
    /// Configuration error
    ConfigError(String),

    /// Initialization error
    InitError(String),

    /// Failed to bind to address
    BindError(String),

    /// Server error
    ServeError(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            Self::InitError(msg) => write!(f, "Initialization error: {}", msg),
            Self::BindError(msg) => write!(f, "Failed to bind: {}", msg),
            Self::ServeError(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for ServerError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptCompiler;
    use tempfile::TempDir;

    fn server(tmp: &TempDir) -> AdminServer {
        let config = AdminConfig::builder()
            .state_dir(tmp.path().join("state"))
            .enable_request_logging(false)
            .build()
            .unwrap();
        AdminServer::new(config, Arc::new(ScriptCompiler::new())).unwrap()
    }

    #[test]
    fn test_server_creation_initializes_layout() {
        let tmp = TempDir::new().unwrap();
        let server = server(&tmp);

        assert!(tmp.path().join("state").is_dir());
        assert!(server.state().dir.stats_dir().is_dir());
    }

    #[test]
    fn test_server_info() {
        let tmp = TempDir::new().unwrap();
        let info = server(&tmp).info();

        assert_eq!(info.state_dir, tmp.path().join("state"));
        assert!(!info.request_logging_enabled);
        assert!(info.display().contains("State Directory"));
    }

    #[test]
    fn test_init_failure_is_reported() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let config = AdminConfig::builder().state_dir(&blocker).build().unwrap();
        let result = AdminServer::new(config, Arc::new(ScriptCompiler::new()));
        assert!(matches!(result, Err(ServerError::InitError(_))));
    }
}
