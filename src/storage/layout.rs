//! Fixed file layout of a state directory

use std::io;
use std::path::{Path, PathBuf};

use super::lock::RunLock;

pub const CONFIG_FILE: &str = "config.star";
pub const STATE_FILE: &str = "state.json";
pub const ERROR_TEMPLATE_FILE: &str = "error.tmpl";
pub const STATS_DIR: &str = "stats";
pub const LOCK_FILE: &str = ".run.lock";

/// Root of all persisted documents
///
/// ```text
/// <root>/config.star
/// <root>/state.json
/// <root>/error.tmpl
/// <root>/stats/*.json
/// <root>/.run.lock
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree. Called once at startup, before any store
    /// or router is built.
    pub fn init(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.stats_dir())?;
        tracing::debug!(root = %self.root.display(), "State directory initialized");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    pub fn error_template_path(&self) -> PathBuf {
        self.root.join(ERROR_TEMPLATE_FILE)
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.root.join(STATS_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    /// The run-lock guarding this directory
    pub fn run_lock(&self) -> RunLock {
        RunLock::new(self.lock_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_tree() {
        let tmp = TempDir::new().unwrap();
        let dir = StateDir::new(tmp.path().join("nested").join("state"));

        dir.init().unwrap();
        dir.init().unwrap();

        assert!(dir.root().is_dir());
        assert!(dir.stats_dir().is_dir());
    }

    #[test]
    fn test_paths() {
        let dir = StateDir::new("/srv/fw");
        assert_eq!(dir.config_path(), PathBuf::from("/srv/fw/config.star"));
        assert_eq!(dir.state_path(), PathBuf::from("/srv/fw/state.json"));
        assert_eq!(dir.error_template_path(), PathBuf::from("/srv/fw/error.tmpl"));
        assert_eq!(dir.lock_path(), PathBuf::from("/srv/fw/.run.lock"));
        assert_eq!(dir.run_lock().path(), Path::new("/srv/fw/.run.lock"));
    }
}
