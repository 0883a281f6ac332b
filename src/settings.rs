//! Trading parameters persisted as a pretty-printed JSON document. Independent
//! of the credential record; a missing or unreadable file simply means the
//! operator has not configured a grid yet.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings file {} could not be written: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("settings serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub selected_token_a: String,
    pub selected_address_a: String,
    pub selected_decimals_a: u8,
    pub selected_token_b: String,
    pub selected_address_b: String,
    pub selected_decimals_b: u8,
    pub trade_size: f64,
    pub spread: f64,
    pub rebalance_allowed: bool,
    pub rebalance_percentage: f64,
    #[serde(rename = "rebalanceSlippageBPS")]
    pub rebalance_slippage_bps: u32,
    pub monitor_delay: u64,
}

/// Result of [`SettingsStore::load`].
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsLoad {
    Loaded(UserSettings),
    /// No usable settings on disk; the caller should collect fresh inputs.
    NotFound,
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the settings file with `settings`. Failures are logged and
    /// returned; nothing is retried here.
    pub fn save(&self, settings: &UserSettings) -> Result<(), SettingsError> {
        match self.write(settings) {
            Ok(()) => {
                info!(path = %self.path.display(), "user settings saved");
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "saving user settings failed");
                Err(err)
            }
        }
    }

    pub fn load(&self) -> SettingsLoad {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(err) => {
                info!(path = %self.path.display(), error = %err, "no user settings found");
                return SettingsLoad::NotFound;
            }
        };
        match serde_json::from_slice(&raw) {
            Ok(settings) => SettingsLoad::Loaded(settings),
            Err(err) => {
                info!(path = %self.path.display(), error = %err, "user settings unreadable");
                SettingsLoad::NotFound
            }
        }
    }

    fn write(&self, settings: &UserSettings) -> Result<(), SettingsError> {
        let mut json = Vec::new();
        let mut serializer =
            serde_json::Serializer::with_formatter(&mut json, PrettyFormatter::with_indent(b"    "));
        settings.serialize(&mut serializer)?;

        let io_err = |source| SettingsError::Io {
            path: self.path.clone(),
            source,
        };
        let tmp_path = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).map_err(io_err)?;
        file.write_all(&json).map_err(io_err)?;
        file.sync_all().map_err(io_err)?;
        drop(file);
        fs::rename(&tmp_path, &self.path).map_err(io_err)
    }
}
