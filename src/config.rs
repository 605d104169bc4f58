use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::worker::DEFAULT_MANIFEST;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Version of the cache generation this build installs
  pub version: String,
  /// Prefix of every cache store name
  pub cache_prefix: String,
  /// Display name used in notifications and the offline page
  pub app_name: String,
  /// Base URL of the app; relative manifest entries resolve against it
  pub origin: Url,
  /// App shell served to navigations that miss both network and cache
  pub app_shell: String,
  /// Base URL of the sync backend
  pub backend_url: Url,
  /// Where the offline database and logs live (default: $XDG_DATA_HOME/studymate)
  pub data_dir: Option<PathBuf>,
  /// Substring identifying app windows when a notification is clicked
  pub window_match: String,
  /// Static assets fetched at install; defaults to the built-in manifest
  pub manifest: Option<Vec<String>>,
  pub schedule: ScheduleConfig,
  /// Hours without study activity before a reminder is shown
  pub reminder_after_hours: i64,
  pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
  /// Periodic `data-backup` trigger
  pub backup_interval_secs: u64,
  /// Periodic `study-reminder` trigger
  pub reminder_interval_secs: u64,
  /// Backend reachability probe
  pub connectivity_interval_secs: u64,
}

impl Default for ScheduleConfig {
  fn default() -> Self {
    Self {
      backup_interval_secs: 12 * 60 * 60,
      reminder_interval_secs: 24 * 60 * 60,
      connectivity_interval_secs: 5,
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      version: "2.0.0".to_string(),
      cache_prefix: "studymate".to_string(),
      app_name: "StudyMate".to_string(),
      origin: Url::parse("https://studymate.app/").expect("static URL is valid"),
      app_shell: "./index.html".to_string(),
      backend_url: Url::parse("https://api.studymate.app/v1/").expect("static URL is valid"),
      data_dir: None,
      window_match: "studymate".to_string(),
      manifest: None,
      schedule: ScheduleConfig::default(),
      reminder_after_hours: 24,
      fetch_timeout_secs: 30,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./studymate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/studymate/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validated()
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("studymate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("studymate").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Check invariants and normalize base URLs so relative joins land below them.
  fn validated(mut self) -> Result<Self> {
    if self.version.trim().is_empty() {
      return Err(eyre!("Config: version must not be empty"));
    }
    if self.cache_prefix.trim().is_empty() {
      return Err(eyre!("Config: cache_prefix must not be empty"));
    }
    self.reminder_after()?;
    for url in [&mut self.origin, &mut self.backend_url] {
      if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
      }
    }
    Ok(self)
  }

  /// Static-asset manifest entries, in install order.
  pub fn manifest_entries(&self) -> Vec<String> {
    self
      .manifest
      .clone()
      .unwrap_or_else(|| DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect())
  }

  /// Resolved data directory.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("studymate"))
  }

  /// Inactivity window before a study reminder, in hours.
  pub fn reminder_after(&self) -> Result<chrono::Duration> {
    if self.reminder_after_hours <= 0 {
      return Err(eyre!(
        "Config: reminder_after_hours must be positive, got {}",
        self.reminder_after_hours
      ));
    }
    chrono::Duration::try_hours(self.reminder_after_hours).ok_or_else(|| {
      eyre!(
        "Config: reminder_after_hours is out of range, got {}",
        self.reminder_after_hours
      )
    })
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }

  /// Get the backend token from the environment, if set.
  ///
  /// Checks STUDYMATE_BACKEND_TOKEN.
  pub fn backend_token() -> Option<String> {
    std::env::var("STUDYMATE_BACKEND_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_yaml_uses_defaults() {
    let config = Config::from_yaml("{}").unwrap().validated().unwrap();
    assert_eq!(config.version, "2.0.0");
    assert_eq!(config.cache_prefix, "studymate");
    assert_eq!(config.schedule.connectivity_interval_secs, 5);
    assert_eq!(config.manifest_entries().len(), DEFAULT_MANIFEST.len());
  }

  #[test]
  fn test_partial_yaml_overrides() {
    let yaml = r#"
version: "2.1.0"
origin: "https://study.example.com/app"
manifest:
  - ./index.html
  - ./app.js
schedule:
  backup_interval_secs: 60
"#;
    let config = Config::from_yaml(yaml).unwrap().validated().unwrap();
    assert_eq!(config.version, "2.1.0");
    assert_eq!(config.origin.as_str(), "https://study.example.com/app/");
    assert_eq!(config.manifest_entries(), vec!["./index.html", "./app.js"]);
    assert_eq!(config.schedule.backup_interval_secs, 60);
    assert_eq!(config.schedule.reminder_interval_secs, 24 * 60 * 60);
  }

  #[test]
  fn test_rejects_empty_version() {
    let config = Config::from_yaml("version: \"\"").unwrap();
    assert!(config.validated().is_err());
  }

  #[test]
  fn test_rejects_out_of_range_reminder_hours() {
    let config = Config::from_yaml("reminder_after_hours: 9223372036854775807").unwrap();
    assert!(config.reminder_after().is_err());
    assert!(config.validated().is_err());

    let config = Config::from_yaml("reminder_after_hours: 0").unwrap();
    assert!(config.validated().is_err());

    let config = Config::from_yaml("reminder_after_hours: 48").unwrap();
    assert_eq!(config.reminder_after().unwrap(), chrono::Duration::hours(48));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/studymate.yaml"))).is_err());
  }
}
