//! Configuration file watcher for hot reload.
//!
//! The binary applies each shipped config to the running router (endpoint
//! list, switch mode, fixed index); everything else needs a restart.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::TxConfig;

/// Watches the configuration file and ships every valid, changed version.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<TxConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<TxConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let watcher = Self {
            path: path.to_path_buf(),
            update_tx,
        };
        (watcher, update_rx)
    }

    /// Start watching. The returned handle must stay alive.
    ///
    /// The parent directory is watched so editors that save by renaming a
    /// temporary file over the original are still seen.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        let mut current = load_config(&path).ok();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, &path) => {
                    if let Some(config) = reload(&path, current.as_ref()) {
                        current = Some(config.clone());
                        let _ = tx.send(config);
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(path = ?path, error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Whether `event` is a write or create of the watched file.
fn touches(event: &Event, path: &Path) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event
            .paths
            .iter()
            .any(|p| p.file_name() == path.file_name())
}

/// Load the file again. `None` when it is invalid or unchanged.
fn reload(path: &Path, current: Option<&TxConfig>) -> Option<TxConfig> {
    match load_config(path) {
        Ok(config) if Some(&config) == current => {
            tracing::debug!(path = ?path, "Config rewritten without changes");
            None
        }
        Ok(config) => {
            tracing::info!(
                path = ?path,
                endpoints = config.router.endpoints.len(),
                switch_mode = ?config.router.switch_mode,
                "Config reloaded, shipping endpoint update"
            );
            Some(config)
        }
        Err(e) => {
            tracing::warn!(path = ?path, error = %e, "Reloaded config rejected, router keeps its endpoints");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, EventKind, ModifyKind};
    use std::io::Write;

    #[test]
    fn test_only_the_watched_file_counts() {
        let path = Path::new("/etc/txl/config.toml");
        let write = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.to_path_buf());
        let sibling = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("/etc/txl/other.toml"));
        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(path.to_path_buf());

        assert!(touches(&write, path));
        assert!(!touches(&sibling, path));
        assert!(!touches(&access, path));
    }

    #[test]
    fn test_reload_skips_unchanged_and_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[router]\nendpoints = [\"3/http://10.0.0.1:8545\"]").unwrap();
        file.flush().unwrap();

        let first = reload(file.path(), None).unwrap();
        assert_eq!(first.router.endpoints.len(), 1);
        assert!(reload(file.path(), Some(&first)).is_none());

        std::fs::write(file.path(), "[router]\nendpoints = []\n").unwrap();
        assert!(reload(file.path(), Some(&first)).is_none());
    }
}
