//! Persistence layer
//!
//! Everything a run or an administrator reads or writes lives in one state
//! directory (see [`layout::StateDir`]). This module provides:
//!
//! - [`config_store::ConfigStore`]: the feed script, validated on write and
//!   guarded by the run-lock
//! - [`state_store::StateStore`]: per-feed dedup records
//! - [`template::TemplateStore`]: the error notification template
//! - [`stats::StatsAggregator`]: immutable per-run statistics records
//! - [`lock::RunLock`]: the run-lock itself
//!
//! Runs access documents through the [`Store`] trait, implemented by
//! [`LocalStore`] over a directory and by [`remote::RemoteStore`] over the
//! admin API of another instance.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use feedwarden::script::ScriptCompiler;
//! use feedwarden::storage::{LocalStore, Store, StateDir};
//!
//! # async fn example() -> Result<(), feedwarden::storage::StoreError> {
//! let dir = StateDir::new("/var/lib/feedwarden");
//! dir.init().map_err(|e| feedwarden::storage::StoreError::io("init", e))?;
//!
//! let store = LocalStore::new(dir, Arc::new(ScriptCompiler::new()));
//! let snapshot = store.load_snapshot().await?;
//! println!("{} bytes of config", snapshot.config.len());
//! # Ok(())
//! # }
//! ```

pub mod atomic;
pub mod config_store;
pub mod error;
pub mod layout;
pub mod lock;
pub mod remote;
pub mod state_store;
pub mod stats;
pub mod template;

use std::sync::Arc;

use async_trait::async_trait;

pub use config_store::ConfigStore;
pub use error::StoreError;
pub use layout::StateDir;
pub use lock::{LockError, LockGuard, RunLock};
pub use remote::{ClientError, RemoteConfig, RemoteStore};
pub use state_store::{FeedState, StateMap, StateStore};
pub use stats::{RunStats, StatsAggregator};
pub use template::TemplateStore;

use crate::script::ConfigCompiler;

// ============================================================================
// Store Trait
// ============================================================================

/// The documents a run needs, read together
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub config: String,
    pub state: StateMap,
    pub error_template: String,
}

/// Document access used by runs and CLI commands
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_config(&self) -> Result<String, StoreError>;

    async fn load_state(&self) -> Result<StateMap, StoreError>;

    async fn load_error_template(&self) -> Result<String, StoreError>;

    /// Persist the state map; returns the number of bytes written
    async fn save_state(&self, state: &StateMap) -> Result<usize, StoreError>;

    async fn save_config(&self, body: &[u8]) -> Result<(), StoreError>;

    async fn save_error_template(&self, body: &[u8]) -> Result<(), StoreError>;

    async fn load_snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(Snapshot {
            config: self.load_config().await?,
            state: self.load_state().await?,
            error_template: self.load_error_template().await?,
        })
    }
}

// ============================================================================
// Local Store
// ============================================================================

/// [`Store`] over a local state directory
#[derive(Clone)]
pub struct LocalStore {
    dir: StateDir,
    config: ConfigStore,
    state: StateStore,
    template: TemplateStore,
}

impl LocalStore {
    pub fn new(dir: StateDir, compiler: Arc<dyn ConfigCompiler>) -> Self {
        Self {
            config: ConfigStore::new(dir.clone(), compiler),
            state: StateStore::new(dir.clone()),
            template: TemplateStore::new(dir.clone()),
            dir,
        }
    }

    pub fn dir(&self) -> &StateDir {
        &self.dir
    }
}

#[async_trait]
impl Store for LocalStore {
    async fn load_config(&self) -> Result<String, StoreError> {
        self.config.get().await
    }

    async fn load_state(&self) -> Result<StateMap, StoreError> {
        self.state.load().await
    }

    async fn load_error_template(&self) -> Result<String, StoreError> {
        self.template.get().await
    }

    async fn save_state(&self, state: &StateMap) -> Result<usize, StoreError> {
        self.state.save(state).await
    }

    async fn save_config(&self, body: &[u8]) -> Result<(), StoreError> {
        self.config.put(body).await.map(|_| ())
    }

    async fn save_error_template(&self, body: &[u8]) -> Result<(), StoreError> {
        self.template.put(body).await
    }
}

#[async_trait]
impl Store for RemoteStore {
    async fn load_config(&self) -> Result<String, StoreError> {
        Ok(self.get_config().await?)
    }

    async fn load_state(&self) -> Result<StateMap, StoreError> {
        let body = self.get_state().await?;
        serde_json::from_slice(&body).map_err(|e| StoreError::json("parse remote state", e))
    }

    async fn load_error_template(&self) -> Result<String, StoreError> {
        Ok(self.get_error_template().await?)
    }

    async fn save_state(&self, state: &StateMap) -> Result<usize, StoreError> {
        let body =
            serde_json::to_vec_pretty(state).map_err(|e| StoreError::json("encode state", e))?;
        self.put_state(&body).await?;
        Ok(body.len())
    }

    async fn save_config(&self, body: &[u8]) -> Result<(), StoreError> {
        Ok(self.put_config(body).await?)
    }

    async fn save_error_template(&self, body: &[u8]) -> Result<(), StoreError> {
        Ok(self.put_error_template(body).await?)
    }
}
