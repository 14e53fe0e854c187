//! JSON-persisted settings backing the control plane's get/set opcodes.

use std::path::{Path, PathBuf};

use openpad_engine::RuntimeSettings;
use openpad_hid_sixaxis_protocol::settings::Settings;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// On-disk settings document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Idle-disconnect timeout in whole minutes; 0 disables it.
    pub idle_timeout_min: u8,
    pub flip_lx: bool,
    pub flip_ly: bool,
    pub flip_rx: bool,
    pub flip_ry: bool,
    pub disable_led: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Settings::default().into()
    }
}

impl From<Settings> for ServiceSettings {
    fn from(s: Settings) -> Self {
        Self {
            idle_timeout_min: s.idle_timeout_min,
            flip_lx: s.flip_lx,
            flip_ly: s.flip_ly,
            flip_rx: s.flip_rx,
            flip_ry: s.flip_ry,
            disable_led: s.disable_led,
        }
    }
}

impl From<ServiceSettings> for Settings {
    fn from(s: ServiceSettings) -> Self {
        Self {
            idle_timeout_min: s.idle_timeout_min,
            flip_lx: s.flip_lx,
            flip_ly: s.flip_ly,
            flip_rx: s.flip_rx,
            flip_ry: s.flip_ry,
            disable_led: s.disable_led,
        }
    }
}

/// Loads settings at startup, keeps the live [`RuntimeSettings`] the engine
/// reads, and persists every change pushed over the control plane.
pub struct SettingsStore {
    path: PathBuf,
    runtime: RuntimeSettings,
}

impl SettingsStore {
    /// Load from `path`, falling back to defaults when the file is missing
    /// or malformed.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<ServiceSettings>(&text) {
                Ok(parsed) => {
                    info!(path = %path.display(), "settings loaded");
                    parsed.into()
                }
                Err(e) => {
                    warn!(path = %path.display(), "settings file malformed, using defaults: {e}");
                    Settings::default()
                }
            },
            Err(e) => {
                info!(path = %path.display(), "no settings file, using defaults: {e}");
                Settings::default()
            }
        };
        Self {
            path,
            runtime: RuntimeSettings::new(settings),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live settings handle shared with the engine's session watchdogs.
    pub fn runtime(&self) -> RuntimeSettings {
        self.runtime.clone()
    }

    pub fn current(&self) -> Settings {
        self.runtime.get()
    }

    /// Apply and persist a settings push from the control plane.
    pub fn update(&self, settings: Settings) {
        self.runtime.set(settings);
        if let Err(e) = self.save() {
            warn!(path = %self.path.display(), "failed to persist settings: {e}");
        }
    }

    fn save(&self) -> std::io::Result<()> {
        let doc: ServiceSettings = self.runtime.get().into();
        let text = serde_json::to_string_pretty(&doc)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, text)
    }
}
