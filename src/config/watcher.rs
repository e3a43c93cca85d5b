//! Configuration file watcher for hot reload.
//!
//! The parent directory is watched rather than the file, so saves that write a
//! temp file and rename it over the config keep being noticed. Bursts of events
//! are collapsed into a single reload once the directory has been quiet for the
//! debounce window.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time;

use crate::config::loader::load_config;
use crate::config::schema::BalancerServiceConfig;

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<BalancerServiceConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<BalancerServiceConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Must be called inside a Tokio runtime.
    ///
    /// The returned handle must be kept alive; dropping it stops reloads.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let file_name = self
            .path
            .file_name()
            .map(OsString::from)
            .ok_or_else(|| notify::Error::generic("config path has no file name"))?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if touches(&event, &file_name) {
                        let _ = event_tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, dir = ?dir, "Config watcher started");
        tokio::spawn(reload_loop(self.path, self.debounce, event_rx, self.update_tx));
        Ok(watcher)
    }
}

/// Whether a directory event changed the watched file.
fn touches(event: &Event, file_name: &OsStr) -> bool {
    (event.kind.is_modify() || event.kind.is_create())
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

/// Ends when the notify handle is dropped or nobody listens for updates.
async fn reload_loop(
    path: PathBuf,
    debounce: Duration,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<BalancerServiceConfig>,
) {
    while events.recv().await.is_some() {
        while let Ok(Some(())) = time::timeout(debounce, events.recv()).await {}

        match load_config(&path) {
            Ok(config) => {
                tracing::info!(path = ?path, endpoints = config.endpoints.len(), "Config file reloaded");
                if updates.send(config).is_err() {
                    return;
                }
            }
            Err(e) => tracing::error!(
                path = ?path,
                error = %e,
                "Failed to reload config, keeping current configuration"
            ),
        }
    }
}
