//! Settings directory for Tally
//!
//! Tally keeps its settings and its ingestion cache side by side in one
//! directory, `~/.config/tally/` unless `TALLY_CONFIG_DIR` points elsewhere.
//! Settings files are JSON. A missing file is not an error: callers fall back
//! to defaults. Writes go through a temporary file and a rename, so a crash
//! never leaves a half-written settings file behind.

use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the settings directory
pub const CONFIG_DIR_ENV: &str = "TALLY_CONFIG_DIR";

/// The settings directory, if one can be determined
pub fn config_dir() -> Option<PathBuf> {
    match std::env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
        Some(dir) => Some(PathBuf::from(dir)),
        None => dirs::config_dir().map(|p| p.join("tally")),
    }
}

/// Path of `filename` inside the settings directory
pub fn config_path(filename: &str) -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(filename))
}

/// Create the settings directory if needed and return it
pub fn init() -> Result<PathBuf> {
    let dir = config_dir().context("Could not determine config directory")?;
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    Ok(dir)
}

/// Read `filename` from the settings directory; `None` when it does not exist
pub fn load_json<T: DeserializeOwned>(filename: &str) -> Result<Option<T>> {
    match config_path(filename) {
        Some(path) => read_json(&path),
        None => Ok(None),
    }
}

/// Read a JSON file that must exist
pub fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    read_json(path)?.with_context(|| format!("Config file not found: {}", path.display()))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read config file: {}", path.display()));
        }
    };
    serde_json::from_str(&content)
        .map(Some)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Write `value` as pretty JSON to `filename` in the settings directory
pub fn save_json<T: Serialize>(filename: &str, value: &T) -> Result<PathBuf> {
    let path = init()?.join(filename);
    save_json_file(&path, value)?;
    Ok(path)
}

/// Replace `path` with `value` as pretty JSON
pub fn save_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value).context("Failed to serialize settings")?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write config file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace config file: {}", path.display()))
}
