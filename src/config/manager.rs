use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::gateway::Gateway;

/// Watches the configuration file and republishes it through [`Gateway::reload`]
///
/// A file that fails to parse or validate is rejected by the gateway; the
/// active route table stays in place.
pub struct ConfigManager {
    gateway: Arc<Gateway>,
    config_path: PathBuf,
    _watcher: Option<RecommendedWatcher>,
}

impl ConfigManager {
    pub fn new<P: AsRef<Path>>(config_path: P, gateway: Arc<Gateway>) -> Self {
        ConfigManager {
            gateway,
            config_path: config_path.as_ref().to_path_buf(),
            _watcher: None,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Start watching for configuration file changes
    pub async fn start_hot_reload(&mut self) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(100);
        let config_path = self.config_path.clone();

        // Create file watcher
        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if let Err(e) = tx.blocking_send(event) {
                        error!("Failed to send file change event: {}", e);
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(1)),
        )?;

        // Watch the directory so editors that replace the file are seen too
        match config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => watcher.watch(parent, RecursiveMode::NonRecursive)?,
            None => watcher.watch(&config_path, RecursiveMode::NonRecursive)?,
        }

        info!("Started watching config file: {:?}", config_path);

        let gateway = Arc::clone(&self.gateway);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !is_config_change(&event, &config_path) {
                    continue;
                }
                debug!("Config file change detected: {:?}", event);

                // Let the writer finish, then coalesce the burst of events it caused
                tokio::time::sleep(Duration::from_millis(100)).await;
                while rx.try_recv().is_ok() {}

                if let Err(e) = reload_from_file(&gateway, &config_path).await {
                    warn!("Failed to hot-reload configuration (keeping current): {:#}", e);
                }
            }
        });

        self._watcher = Some(watcher);
        Ok(())
    }

    /// Manually reload configuration from file
    pub async fn reload_config(&self) -> Result<u64> {
        info!(
            "Manually reloading configuration from {:?}",
            self.config_path
        );
        reload_from_file(&self.gateway, &self.config_path).await
    }
}

async fn reload_from_file(gateway: &Gateway, config_path: &Path) -> Result<u64> {
    let content = tokio::fs::read_to_string(config_path)
        .await
        .with_context(|| format!("failed to read config file {:?}", config_path))?;
    let version = gateway.reload_from_toml(&content)?;
    info!(version = version, "Configuration hot-reloaded successfully");
    Ok(version)
}

fn is_config_change(event: &Event, config_path: &Path) -> bool {
    use notify::EventKind;

    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return false;
    }
    let file_name = config_path.file_name();
    event
        .paths
        .iter()
        .any(|path| path == config_path || (file_name.is_some() && path.file_name() == file_name))
}
