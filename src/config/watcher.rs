//! Configuration file watcher for hot reload.
//!
//! Every change event re-reads the file and compares it against the last
//! accepted configuration. Only validated updates that keep address
//! derivation intact are forwarded; repeated events for one save are dropped.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::WalletConfig;
use crate::config::validation::validate_reload;

/// What a change event amounts to.
#[derive(Debug)]
pub enum ReloadDecision {
    Apply(WalletConfig),
    /// The file parses to the running configuration.
    Unchanged,
    Rejected(String),
}

/// Re-read `path` and decide whether it may replace `current`.
pub fn evaluate_change(path: &Path, current: &WalletConfig) -> ReloadDecision {
    let next = match load_config(path) {
        Ok(next) => next,
        Err(e) => return ReloadDecision::Rejected(e.to_string()),
    };
    if same_config(current, &next) {
        return ReloadDecision::Unchanged;
    }
    match validate_reload(current, &next) {
        Ok(()) => ReloadDecision::Apply(next),
        Err(errors) => ReloadDecision::Rejected(
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", "),
        ),
    }
}

fn same_config(a: &WalletConfig, b: &WalletConfig) -> bool {
    format!("{:?}", a) == format!("{:?}", b)
}

/// Watches the configuration file and forwards accepted updates.
pub struct ConfigWatcher {
    path: PathBuf,
    current: WalletConfig,
    update_tx: mpsc::UnboundedSender<WalletConfig>,
}

impl ConfigWatcher {
    /// `current` is the configuration the service started with.
    ///
    /// Returns the watcher and a receiver for accepted configuration updates.
    pub fn new(path: &Path, current: WalletConfig) -> (Self, mpsc::UnboundedReceiver<WalletConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                current,
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned watcher must be kept alive for updates to keep flowing.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self {
            path,
            mut current,
            update_tx,
        } = self;
        let watched = path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    match evaluate_change(&path, &current) {
                        ReloadDecision::Apply(next) => {
                            tracing::info!(chains = next.chains.len(), "Config change accepted");
                            current = next.clone();
                            let _ = update_tx.send(next);
                        }
                        ReloadDecision::Unchanged => {
                            tracing::debug!("Config file touched without changes");
                        }
                        ReloadDecision::Rejected(reason) => {
                            tracing::error!(%reason, "Config reload rejected. Keeping current configuration.");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&watched, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?watched, "Config watcher started");
        Ok(watcher)
    }
}
