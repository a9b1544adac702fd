//! Plugin discovery and identity.
//!
//! A plugin is any executable file in the configured plugin directory.
//! The filename convention `{name}.{interval}.{ext}` declares the
//! refresh cadence (`cpu.5s.sh` runs every five seconds); files with no
//! interval segment are manual-refresh only. A `.off` suffix disables a
//! plugin without removing it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity and schedule of one plugin. Owned by the engine registry;
/// only `enabled` and the interval change after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginSource {
    /// Filename, unique within the plugin directory.
    pub id: String,
    /// Filename stem with the interval segment removed.
    pub name: String,
    pub path: PathBuf,
    /// Declared refresh interval in seconds; `None` means manual only.
    pub refresh_secs: Option<u64>,
    pub enabled: bool,
}

impl PluginSource {
    /// Build a source from a file path, reading the interval from the
    /// filename and falling back to `default_interval`.
    pub fn from_path(path: PathBuf, default_interval: Option<Duration>) -> Option<PluginSource> {
        let file_name = path.file_name()?.to_str()?.to_string();
        let interval = interval_from_filename(&file_name).or(default_interval);
        Some(PluginSource {
            id: file_name.clone(),
            name: display_name(&file_name),
            path,
            refresh_secs: interval.map(|d| d.as_secs()),
            enabled: true,
        })
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_secs.map(Duration::from_secs)
    }

    /// Environment overlay injected into every execution on behalf of
    /// this plugin, scheduled or user-triggered alike.
    pub fn env_overlay(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("BARISTA_VERSION".into(), env!("CARGO_PKG_VERSION").into());
        env.insert("BARISTA_PLUGIN_NAME".into(), self.name.clone());
        env.insert("BARISTA_PLUGIN_PATH".into(), self.path.display().to_string());
        env
    }
}

lazy_static::lazy_static! {
    static ref INTERVAL_RE: regex::Regex = regex::Regex::new(r"^([0-9]+)(s|m|h|d)$").unwrap();
}

/// Parse one filename segment as an interval: `5s`, `2m`, `1h`, `3d`.
pub fn parse_interval(segment: &str) -> Option<Duration> {
    let caps = INTERVAL_RE.captures(segment)?;
    let n: u64 = caps[1].parse().ok()?;
    let secs = match &caps[2] {
        "s" => n,
        "m" => n * 60,
        "h" => n * 3600,
        "d" => n * 86400,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// First interval-shaped segment of a dotted filename, if any.
pub fn interval_from_filename(file_name: &str) -> Option<Duration> {
    file_name.split('.').find_map(parse_interval)
}

/// Filename stem with the interval segment and extension removed.
fn display_name(file_name: &str) -> String {
    let kept: Vec<&str> = file_name
        .split('.')
        .filter(|seg| parse_interval(seg).is_none())
        .collect();
    match kept.len() {
        0 => file_name.to_string(),
        1 => kept[0].to_string(),
        // Drop the extension.
        _ => kept[..kept.len() - 1].join("."),
    }
}

/// Scan the plugin directory. Hidden files, directories, `.off` files,
/// and non-executables are skipped. Results are sorted by id so
/// registration order is stable.
pub fn discover(dir: &Path, default_interval: Option<Duration>) -> Result<Vec<PluginSource>, String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("failed to read plugin directory {}: {e}", dir.display()))?;

    let mut sources = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("failed to read directory entry: {e}"))?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name.starts_with('.') || file_name.ends_with(".off") {
            continue;
        }
        if !path.is_file() {
            continue;
        }
        if !is_executable(&path) {
            tracing::debug!(file = %path.display(), "skipping non-executable file");
            continue;
        }
        if let Some(source) = PluginSource::from_path(path, default_interval) {
            sources.push(source);
        }
    }

    sources.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sources)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
