use std::{fs, path::Path, time::Duration};

use serde_yaml::{Mapping, Value};
use thiserror::Error;

use super::yaml::{invalidate, load_yaml};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("{path} is not valid YAML: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("{path} must contain a YAML mapping at the top level")]
    NotAMapping { path: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub debug: bool,
    pub log_level: String,
    pub target_exe: Option<String>,
    pub settings: AppSettings,
}

#[derive(Debug, Clone, Default)]
pub struct AppSettings {
    pub session: SessionConfig,
    pub watcher: WatcherSettings,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub poll_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub disable_delay_ms: u64,
    pub refresh_baseline_before_disable: bool,
}

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            retry_delay_ms: 500,
            disable_delay_ms: 0,
            refresh_baseline_before_disable: false,
        }
    }
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 1000,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "warn".to_string(),
            target_exe: None,
            settings: AppSettings::default(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn disable_delay(&self) -> Duration {
        Duration::from_millis(self.disable_delay_ms)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Option<Self> {
        let value = load_yaml(path)?;
        Self::from_yaml(&value)
    }

    pub fn from_yaml(root: &Value) -> Option<Self> {
        let map = root.as_mapping()?;
        let mut config = Self::default();

        config.debug = bool_at(map, "debug").unwrap_or(config.debug);
        config.log_level = str_at(map, "log_level")
            .unwrap_or(&config.log_level)
            .to_lowercase();
        config.target_exe = str_any(map, &["target_exe", "target", "target_path"])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        config.settings = parse_settings(map);

        Some(config)
    }
}

fn parse_settings(root: &Mapping) -> AppSettings {
    let mut settings = AppSettings::default();

    let Some(settings_map) = mapping_at(root, "settings") else {
        return settings;
    };

    if let Some(session) = mapping_at(settings_map, "session") {
        settings.session.poll_interval_ms =
            u64_any(session, &["poll_interval_ms", "check_interval_ms", "interval_ms"])
                .unwrap_or(settings.session.poll_interval_ms)
                .max(100);
        settings.session.retry_delay_ms = u64_any(session, &["retry_delay_ms", "retry_backoff_ms"])
            .unwrap_or(settings.session.retry_delay_ms);
        settings.session.disable_delay_ms =
            u64_any(session, &["disable_delay_ms", "grace_period_ms", "warning_delay_ms"])
                .unwrap_or(settings.session.disable_delay_ms);
        settings.session.refresh_baseline_before_disable = bool_any(
            session,
            &["refresh_baseline_before_disable", "recapture_before_disable"],
        )
        .unwrap_or(settings.session.refresh_baseline_before_disable);
    }

    if let Some(watcher) = mapping_at(settings_map, "watcher") {
        settings.watcher.enabled = bool_any(watcher, &["enabled", "auto_reload", "live_reload"])
            .unwrap_or(settings.watcher.enabled);
        settings.watcher.interval_ms = u64_any(watcher, &["interval_ms", "check_interval_ms"])
            .unwrap_or(settings.watcher.interval_ms)
            .max(100);
    }

    settings
}

/// Persists the watched executable, leaving every other key in the file untouched.
/// `None` or an empty string removes the target.
pub fn save_target_exe(path: &Path, target: Option<&str>) -> Result<(), ConfigError> {
    let display = path.display().to_string();

    let mut root = match fs::read_to_string(path) {
        Ok(txt) if !txt.trim().is_empty() => {
            serde_yaml::from_str::<Value>(&txt).map_err(|source| ConfigError::Parse {
                path: display.clone(),
                source,
            })?
        }
        Ok(_) => Value::Mapping(Mapping::new()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Mapping(Mapping::new()),
        Err(source) => {
            return Err(ConfigError::Read {
                path: display,
                source,
            })
        }
    };

    let map = root
        .as_mapping_mut()
        .ok_or_else(|| ConfigError::NotAMapping { path: display.clone() })?;

    for alias in ["target", "target_path"] {
        map.remove(Value::String(alias.to_string()));
    }

    let key = Value::String("target_exe".to_string());
    match target.map(str::trim).filter(|s| !s.is_empty()) {
        Some(target) => {
            map.insert(key, Value::String(target.to_string()));
        }
        None => {
            map.remove(key);
        }
    }

    let txt = serde_yaml::to_string(&root).map_err(|source| ConfigError::Parse {
        path: display.clone(),
        source,
    })?;
    fs::write(path, txt).map_err(|source| ConfigError::Write {
        path: display,
        source,
    })?;
    invalidate(path);

    Ok(())
}

fn bool_at(map: &Mapping, key: &str) -> Option<bool> {
    map.get(Value::String(key.to_string()))?.as_bool()
}

fn bool_any(map: &Mapping, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| bool_at(map, k))
}

fn str_at<'a>(map: &'a Mapping, key: &str) -> Option<&'a str> {
    map.get(Value::String(key.to_string()))?.as_str()
}

fn str_any<'a>(map: &'a Mapping, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| str_at(map, k))
}

fn mapping_at<'a>(map: &'a Mapping, key: &str) -> Option<&'a Mapping> {
    map.get(Value::String(key.to_string()))?.as_mapping()
}

fn u64_at(map: &Mapping, key: &str) -> Option<u64> {
    map.get(Value::String(key.to_string()))?
        .as_i64()
        .and_then(|v| if v >= 0 { Some(v as u64) } else { None })
}

fn u64_any(map: &Mapping, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|k| u64_at(map, k))
}
