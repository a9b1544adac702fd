//! Engine configuration persisted as JSON in the platform config dir.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::terminal::TerminalApp;

const CONFIG_FILE: &str = "config.json";

/// Get the config directory using the platform-appropriate location.
/// Falls back to `~/.barista/` if the platform dir is unavailable.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("barista"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".barista")
        })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    /// Where plugin executables live. Supplied by the user; the engine
    /// treats it as a read-only input.
    pub plugin_dir: Option<PathBuf>,
    /// Fallback cadence in seconds for plugins whose filename declares
    /// no interval. `None` leaves them manual-refresh only.
    pub default_refresh_secs: Option<u64>,
    /// Hard cap on a single script execution.
    pub exec_timeout_secs: u64,
    /// Terminal program targeted by interactive actions.
    pub terminal: TerminalApp,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            plugin_dir: None,
            default_refresh_secs: None,
            exec_timeout_secs: 30,
            terminal: TerminalApp::Terminal,
        }
    }
}

/// Load the config, falling back to defaults when the file is missing
/// or unreadable. A corrupt file is logged, never fatal.
pub fn load_app_config() -> AppConfig {
    load_from(&config_dir().join(CONFIG_FILE))
}

pub(crate) fn load_from(path: &Path) -> AppConfig {
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "invalid config, using defaults");
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}

/// Persist the config, creating the directory if needed.
pub fn save_app_config(config: &AppConfig) -> Result<(), String> {
    save_to(config, &config_dir().join(CONFIG_FILE))
}

pub(crate) fn save_to(config: &AppConfig, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create config dir: {e}"))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("failed to serialize config: {e}"))?;
    std::fs::write(path, json).map_err(|e| format!("failed to write config: {e}"))
}
