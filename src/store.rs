//! Preference persistence.
//!
//! The engine hands out opaque serializable records (channel board, global
//! settings, play history, named presets) and is agnostic to the storage
//! medium behind the [`PreferenceStore`] trait. [`JsonFileStore`] is the
//! stock implementation: one pretty-printed JSON file under the platform
//! config directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::{Channel, GlobalSettings};
use crate::remote::GeneratedSegment;
use crate::Result;

/// A named snapshot of the parameter surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    pub channels: Vec<Channel>,
    pub settings: GlobalSettings,
}

/// Everything worth keeping between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default = "GlobalSettings::default")]
    pub settings: GlobalSettings,
    #[serde(default)]
    pub history: Vec<GeneratedSegment>,
    #[serde(default)]
    pub presets: Vec<Preset>,
}

/// Storage collaborator for session snapshots.
pub trait PreferenceStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<SessionSnapshot>>;
    fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;
}

/// JSON file store under the platform config directory.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config-dir>/prompt-dj/session.json`.
    pub fn default_location() -> Self {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("prompt-dj");
        path.push("session.json");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for JsonFileStore {
    fn load(&self) -> Result<Option<SessionSnapshot>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(snapshot)?;
        std::fs::write(&self.path, json)?;
        tracing::debug!(path = %self.path.display(), "session snapshot saved");
        Ok(())
    }
}
