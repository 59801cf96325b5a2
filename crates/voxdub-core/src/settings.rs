//! User-facing dubbing settings: the external key-value source read before
//! every submission, plus a file watcher that reports toggles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use notify::{EventKind, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, error, info};

use crate::error::{Result, VoxdubError};
use crate::types::{DEFAULT_ACCENT, DEFAULT_VOICE, VoiceSelection};

/// `{ enabled, accent, voice }` as stored by the settings UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_accent")]
    pub accent: String,

    #[serde(default = "default_voice")]
    pub voice: String,
}

fn default_accent() -> String {
    DEFAULT_ACCENT.into()
}

fn default_voice() -> String {
    DEFAULT_VOICE.into()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: false,
            accent: default_accent(),
            voice: default_voice(),
        }
    }
}

impl Settings {
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Accent and voice with blank values replaced by defaults.
    pub fn selection(&self) -> VoiceSelection {
        VoiceSelection::new(&self.accent, &self.voice)
    }
}

/// Asynchronous read access to the current settings.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn load(&self) -> Result<Settings>;
}

/// Settings held in memory, mutated by whoever owns a clone.
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<Settings>>,
}

impl SharedSettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub async fn set_enabled(&self, enabled: bool) {
        self.inner.write().await.enabled = enabled;
    }

    pub async fn replace(&self, settings: Settings) {
        *self.inner.write().await = settings;
    }
}

#[async_trait]
impl SettingsSource for SharedSettings {
    async fn load(&self) -> Result<Settings> {
        Ok(self.inner.read().await.clone())
    }
}

/// Settings persisted as JSON, re-read on every `load`.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write settings, creating the parent directory if needed.
    pub async fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        tokio::fs::write(&self.path, json).await?;
        Ok(())
    }

    /// Read-modify-write helper for the CLI.
    pub async fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<Settings> {
        let mut settings = self.load().await?;
        f(&mut settings);
        self.save(&settings).await?;
        Ok(settings)
    }

    fn parse(raw: &str) -> Result<Settings> {
        if raw.trim().is_empty() {
            return Ok(Settings::default());
        }
        json5::from_str(raw).map_err(|e| VoxdubError::Settings(e.to_string()))
    }
}

#[async_trait]
impl SettingsSource for SettingsFile {
    async fn load(&self) -> Result<Settings> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => Self::parse(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Settings::default()),
            Err(e) => Err(VoxdubError::Io(e)),
        }
    }
}

/// A settings change event.
#[derive(Debug, Clone)]
pub struct SettingsChange {
    pub previous: Settings,
    pub current: Settings,
}

impl SettingsChange {
    /// `Some(new_value)` when `enabled` flipped.
    pub fn enabled_toggled(&self) -> Option<bool> {
        (self.previous.enabled != self.current.enabled).then_some(self.current.enabled)
    }
}

/// Watches the settings file and emits change events.
pub struct SettingsWatcher {
    current: Arc<std::sync::Mutex<Settings>>,
    change_tx: broadcast::Sender<SettingsChange>,
    _watcher: notify::RecommendedWatcher,
}

impl SettingsWatcher {
    /// Start watching `path`. Returns the watcher and a receiver for change events.
    pub fn start(
        path: PathBuf,
        initial: Settings,
    ) -> anyhow::Result<(Self, broadcast::Receiver<SettingsChange>)> {
        let current = Arc::new(std::sync::Mutex::new(initial));
        let (change_tx, change_rx) = broadcast::channel(16);

        let current_clone = current.clone();
        let tx_clone = change_tx.clone();
        let path_clone = path.clone();

        let mut watcher =
            notify::recommended_watcher(move |res: std::result::Result<notify::Event, notify::Error>| {
                match res {
                    Ok(event) => {
                        if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            return;
                        }
                        if !event.paths.iter().any(|p| p.ends_with(file_name(&path_clone))) {
                            return;
                        }
                        let raw = match std::fs::read_to_string(&path_clone) {
                            Ok(raw) => raw,
                            Err(e) => {
                                error!(%e, "Failed to read settings file");
                                return;
                            }
                        };
                        match SettingsFile::parse(&raw) {
                            Ok(next) => {
                                let Ok(mut guard) = current_clone.lock() else {
                                    return;
                                };
                                if *guard == next {
                                    return;
                                }
                                let change = SettingsChange {
                                    previous: guard.clone(),
                                    current: next.clone(),
                                };
                                *guard = next;
                                debug!(enabled = change.current.enabled, "Settings changed");
                                let _ = tx_clone.send(change);
                            }
                            // Editors often write partial files; the next event will carry the rest.
                            Err(e) => debug!(%e, "Ignoring unparsable settings"),
                        }
                    }
                    Err(e) => {
                        error!(%e, "Settings file watch error");
                    }
                }
            })?;

        // Watch the parent directory to catch renames/recreates
        let watch_path = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&watch_path)?;

        watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;
        info!(path = %path.display(), "Settings watcher started");

        Ok((
            Self {
                current,
                change_tx,
                _watcher: watcher,
            },
            change_rx,
        ))
    }

    /// Subscribe to settings change events.
    pub fn subscribe(&self) -> broadcast::Receiver<SettingsChange> {
        self.change_tx.subscribe()
    }

    /// Last settings seen by the watcher.
    pub fn current(&self) -> Settings {
        self.current
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

fn file_name(path: &Path) -> &std::ffi::OsStr {
    path.file_name().unwrap_or(path.as_os_str())
}
