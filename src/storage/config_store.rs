//! Config Store: the user-editable feed script

use std::io;
use std::sync::Arc;

use super::atomic;
use super::error::StoreError;
use super::layout::StateDir;
use crate::script::{CompileError, ConfigCompiler, ParsedConfig};

const LOCK_OWNER: &str = "admin config write";

/// Validated storage of `config.star`
///
/// Writes take the run-lock without waiting and compile the script before
/// anything touches disk. The stored bytes have always compiled.
#[derive(Clone)]
pub struct ConfigStore {
    dir: StateDir,
    compiler: Arc<dyn ConfigCompiler>,
}

impl ConfigStore {
    pub fn new(dir: StateDir, compiler: Arc<dyn ConfigCompiler>) -> Self {
        Self { dir, compiler }
    }

    /// Current script text; empty if none was ever stored
    pub async fn get(&self) -> Result<String, StoreError> {
        match tokio::fs::read_to_string(self.dir.config_path()).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(StoreError::io("read config", err)),
        }
    }

    /// Validate and store a new script.
    ///
    /// Fails with [`StoreError::Conflict`] while a run holds the lock and
    /// with [`StoreError::InvalidConfig`] when the script does not compile;
    /// in both cases the stored script is untouched.
    pub async fn put(&self, body: &[u8]) -> Result<ParsedConfig, StoreError> {
        let mut guard = match self.dir.run_lock().try_acquire(LOCK_OWNER) {
            Ok(guard) => guard,
            Err(err) if err.is_busy() => {
                tracing::info!("Config write rejected: run in progress");
                return Err(StoreError::Conflict { resource: "config" });
            }
            Err(err) => return Err(err.into()),
        };

        let src = std::str::from_utf8(body).map_err(|e| {
            StoreError::InvalidConfig(CompileError::new(1, 1, format!("config is not UTF-8: {e}")))
        })?;
        let parsed = self.compiler.compile(src).map_err(StoreError::InvalidConfig)?;

        atomic::replace(&self.dir.config_path(), body)
            .await
            .map_err(|e| StoreError::io("write config", e))?;

        guard.release()?;
        tracing::info!(feeds = parsed.feeds.len(), "Config updated");
        Ok(parsed)
    }

    /// Compile the stored script
    pub async fn load(&self) -> Result<ParsedConfig, StoreError> {
        let src = self.get().await?;
        self.compiler.compile(&src).map_err(StoreError::InvalidConfig)
    }

    pub fn compiler(&self) -> &Arc<dyn ConfigCompiler> {
        &self.compiler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::ScriptCompiler;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> ConfigStore {
        let dir = StateDir::new(tmp.path());
        dir.init().unwrap();
        ConfigStore::new(dir, Arc::new(ScriptCompiler::new()))
    }

    #[tokio::test]
    async fn test_get_absent_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(store(&tmp).get().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let src = "feed(url=\"https://example.com\")\n";

        let parsed = store.put(src.as_bytes()).await.unwrap();
        assert_eq!(parsed.feeds.len(), 1);
        assert_eq!(store.get().await.unwrap(), src);
        assert_eq!(store.load().await.unwrap(), parsed);
    }

    #[tokio::test]
    async fn test_invalid_script_leaves_file_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.put(b"feed(url=\"https://example.com\")").await.unwrap();

        let err = store.put(b"invalid starlark").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
        assert_eq!(store.get().await.unwrap(), "feed(url=\"https://example.com\")");
    }

    #[tokio::test]
    async fn test_non_utf8_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let err = store(&tmp).put(&[0xff, 0xfe]).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn test_put_while_locked_conflicts() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let _run = store.dir.run_lock().try_acquire("run").unwrap();

        let err = store.put(b"feed(url=\"https://example.com\")").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_lock_released_after_put() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.put(b"").await.unwrap();
        let _ = store.put(b"broken(").await;

        assert!(!store.dir.run_lock().is_locked());
    }
}
