//! Persistent Player Settings
//!
//! What the front end restores on the next start.
//!
//! # Storage Locations
//! - Linux: `~/.config/nativeaudio/settings.json`
//! - Windows: `%APPDATA%\nativeaudio\settings.json`
//! - macOS: `~/Library/Application Support/com.nativeaudio.nativeaudio/settings.json`

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// Last URI handed to the URI player
    #[serde(default)]
    pub last_uri: Option<String>,

    /// URI player volume in millibel
    #[serde(default)]
    pub uri_volume_millibel: i32,

    /// Stereo position in permille
    #[serde(default)]
    pub stereo_position_permille: i32,

    #[serde(default)]
    pub stereo_position_enabled: bool,

    #[serde(default)]
    pub reverb_enabled: bool,

    /// When these settings were last written
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            last_uri: None,
            uri_volume_millibel: 0,
            stereo_position_permille: 0,
            stereo_position_enabled: false,
            reverb_enabled: false,
            saved_at: None,
        }
    }
}

impl PlayerSettings {
    /// Load from the platform config dir, or defaults if missing/corrupt
    pub fn load() -> Self {
        match Self::get_config_path() {
            Some(path) => Self::load_from(&path),
            None => {
                info!("Using default settings");
                Self::default()
            }
        }
    }

    /// Load from `path`, or defaults if missing/corrupt
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::File::open(path) {
                Ok(file) => match serde_json::from_reader(file) {
                    Ok(settings) => {
                        info!("Settings loaded from {:?}", path);
                        return settings;
                    }
                    Err(e) => error!("Failed to parse settings file: {}", e),
                },
                Err(e) => error!("Failed to open settings file: {}", e),
            }
        }

        info!("Using default settings");
        Self::default()
    }

    /// Save to the platform config dir
    pub fn save(&mut self) -> EngineResult<()> {
        let path = Self::get_config_path().ok_or_else(|| {
            EngineError::ConfigError("Could not determine config path".to_string())
        })?;
        self.save_to(&path)
    }

    /// Save to `path`, stamping `saved_at`
    pub fn save_to(&mut self, path: &Path) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.saved_at = Some(Utc::now());

        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;

        info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Platform-specific settings file
    pub fn get_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "nativeaudio", "nativeaudio")
            .map(|proj| proj.config_dir().join("settings.json"))
    }
}
