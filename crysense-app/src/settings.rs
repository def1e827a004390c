//! Persistent application settings (JSON file in app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crysense_core::inference::MODEL_DIR_ENV;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Directory holding `cry_classifier.json` and `label_encoder.json`.
    pub model_dir: Option<String>,
    pub ffmpeg_path: String,
    pub db_path: Option<String>,
    /// Label that triggers the cry verdict tiers.
    pub cry_label: String,
    pub cry_alert_threshold: f32,
    pub cry_possible_threshold: f32,
    pub inference_timeout_secs: u64,
    pub history_enabled: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_dir: None,
            ffmpeg_path: "ffmpeg".into(),
            db_path: None,
            cry_label: "cry".into(),
            cry_alert_threshold: 0.8,
            cry_possible_threshold: 0.6,
            inference_timeout_secs: 60,
            history_enabled: true,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.model_dir = trimmed(self.model_dir.as_deref());
        self.db_path = trimmed(self.db_path.as_deref());
        self.ffmpeg_path = match self.ffmpeg_path.trim() {
            "" => "ffmpeg".into(),
            p => p.into(),
        };
        self.cry_label = match self.cry_label.trim().to_ascii_lowercase().as_str() {
            "" => "cry".into(),
            label => label.into(),
        };
        self.cry_alert_threshold = finite_or(self.cry_alert_threshold, 0.8).clamp(0.0, 1.0);
        self.cry_possible_threshold = finite_or(self.cry_possible_threshold, 0.6)
            .clamp(0.0, 1.0)
            .min(self.cry_alert_threshold);
        self.inference_timeout_secs = self.inference_timeout_secs.clamp(1, 600);
    }

    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("crysense.db"))
    }
}

fn trimmed(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn finite_or(v: f32, fallback: f32) -> f32 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}

/// Export settings the core reads from the environment. Variables already set
/// by the user win.
pub fn apply_runtime_env_from_settings(settings: &AppSettings) {
    if std::env::var(MODEL_DIR_ENV).is_err() {
        if let Some(dir) = settings.model_dir.as_ref() {
            std::env::set_var(MODEL_DIR_ENV, dir);
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("CrySense")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("crysense")
    }
}

pub fn default_settings_path() -> PathBuf {
    default_data_dir().join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
