//! Configuration and state resolution for the CLI

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use surge_lib::config::default_state_path;
use surge_lib::store::{FileStore, KvStore};
use surge_lib::WatchConfig;
use tracing::debug;

/// Load the full watcher configuration
pub fn load_watch_config(path: Option<&Path>) -> Result<WatchConfig> {
    WatchConfig::load(path).context("Failed to load watcher configuration")
}

/// State file path: explicit override, else the watcher default
pub fn state_path(override_path: Option<PathBuf>) -> PathBuf {
    override_path.unwrap_or_else(default_state_path)
}

/// Open the state file without requiring the API credentials
pub fn open_store(override_path: Option<PathBuf>) -> Result<Arc<dyn KvStore>> {
    let path = state_path(override_path);
    debug!(path = %path.display(), "Opening state file");

    let store = FileStore::open(&path)
        .with_context(|| format!("Failed to open state file {}", path.display()))?;
    Ok(Arc::new(store))
}
