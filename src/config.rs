use crate::cli::CliArgs;
use crate::error::ConfigError;
use crate::input::KeyBindings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const APP_DIR: &str = "kubeboard";
const DEFAULT_REFRESH_MS: u64 = 5_000;
const MIN_REFRESH_MS: u64 = 250;
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_LOG_MAX_FILES: usize = 5;

#[derive(Debug, Clone, Deserialize, Default)]
struct SettingsFile {
    #[serde(default)]
    refresh_ms: Option<u64>,
    #[serde(default)]
    log_filter: Option<String>,
    #[serde(default)]
    log_max_files: Option<usize>,
    #[serde(default)]
    plugins_dir: Option<PathBuf>,
    #[serde(default)]
    keybindings: BTreeMap<String, String>,
    #[serde(default)]
    plugin_config: BTreeMap<String, serde_json::Value>,
}

/// Effective settings: file values with CLI flags layered on top.
#[derive(Debug, Clone)]
pub struct Settings {
    pub source: Option<PathBuf>,
    pub refresh: Duration,
    pub log_filter: String,
    pub log_max_files: usize,
    pub log_dir: PathBuf,
    pub plugins_dir: PathBuf,
    pub keybindings: KeyBindings,
    pub plugin_config: BTreeMap<String, serde_json::Value>,
}

impl Settings {
    pub fn load(args: &CliArgs) -> Result<Self, ConfigError> {
        let source = args.config.clone().or_else(discover_config_path);
        let file = match &source {
            Some(path) => read_settings(path)?,
            None => SettingsFile::default(),
        };
        Self::resolve(source, file, args)
    }

    fn resolve(
        source: Option<PathBuf>,
        file: SettingsFile,
        args: &CliArgs,
    ) -> Result<Self, ConfigError> {
        let refresh_ms = args
            .refresh_ms
            .or(file.refresh_ms)
            .unwrap_or(DEFAULT_REFRESH_MS)
            .max(MIN_REFRESH_MS);
        let log_filter = args
            .log_filter
            .clone()
            .or(file.log_filter)
            .filter(|filter| !filter.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let plugins_dir = args
            .plugins_dir
            .clone()
            .or(file.plugins_dir)
            .unwrap_or_else(|| config_dir().join("plugins"));

        Ok(Self {
            source,
            refresh: Duration::from_millis(refresh_ms),
            log_filter,
            log_max_files: file.log_max_files.unwrap_or(DEFAULT_LOG_MAX_FILES).max(1),
            log_dir: log_dir(),
            plugins_dir,
            keybindings: KeyBindings::with_overrides(&file.keybindings)?,
            plugin_config: file.plugin_config,
        })
    }
}

fn read_settings(path: &Path) -> Result<SettingsFile, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if raw.trim().is_empty() {
        return Ok(SettingsFile::default());
    }
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `$XDG_CONFIG_HOME/kubeboard` or the platform equivalent.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
}

pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("logs")
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KUBEBOARD_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [PathBuf::from("kubeboard.yaml"), PathBuf::from(".kubeboard.yaml")];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let dir = config_dir();
    ["config.yaml", "config.yml"]
        .into_iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.exists())
}

#[cfg(test)]
mod tests {
    use super::{Settings, SettingsFile, read_settings};
    use crate::app::InputMode;
    use crate::cli::CliArgs;
    use crate::error::ConfigError;
    use crate::input::Action;
    use clap::Parser;
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn settings_file(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .expect("settings file");
        std::fs::write(file.path(), contents).expect("write settings");
        file
    }

    #[test]
    fn file_values_apply_when_flags_are_absent() {
        let file = settings_file(
            r#"
refresh_ms: 2000
log_filter: debug
log_max_files: 3
plugins_dir: /opt/kubeboard/plugins
keybindings:
  new_tab: alt+t
plugin_config:
  cost:
    currency: EUR
"#,
        );
        let args = CliArgs::parse_from(["kubeboard"]);
        let parsed = read_settings(file.path()).expect("parsed settings");
        let settings =
            Settings::resolve(Some(file.path().to_path_buf()), parsed, &args).expect("settings");

        assert_eq!(settings.refresh, Duration::from_secs(2));
        assert_eq!(settings.log_filter, "debug");
        assert_eq!(settings.log_max_files, 3);
        assert_eq!(settings.plugins_dir, PathBuf::from("/opt/kubeboard/plugins"));
        assert_eq!(settings.plugin_config["cost"], json!({ "currency": "EUR" }));
        assert_eq!(
            settings.keybindings.map(
                InputMode::Normal,
                KeyEvent::new(KeyCode::Char('t'), KeyModifiers::ALT)
            ),
            Some(Action::NewTab)
        );
    }

    #[test]
    fn flags_override_file_and_refresh_is_clamped() {
        let args = CliArgs::parse_from([
            "kubeboard",
            "--refresh-ms",
            "10",
            "--log-filter",
            "trace",
            "--plugins-dir",
            "/tmp/plugins",
        ]);
        let file = SettingsFile {
            refresh_ms: Some(9_000),
            log_filter: Some("warn".to_string()),
            ..SettingsFile::default()
        };
        let settings = Settings::resolve(None, file, &args).expect("settings");

        assert_eq!(settings.refresh, Duration::from_millis(250));
        assert_eq!(settings.log_filter, "trace");
        assert_eq!(settings.plugins_dir, PathBuf::from("/tmp/plugins"));
        assert_eq!(settings.log_max_files, 5);
    }

    #[test]
    fn malformed_settings_are_parse_errors() {
        let file = settings_file("refresh_ms: [not, a, number]");
        assert!(matches!(
            read_settings(file.path()),
            Err(ConfigError::Parse { .. })
        ));
        assert!(read_settings(&PathBuf::from("/definitely/missing.yaml")).is_err());
    }

    #[test]
    fn empty_settings_file_uses_defaults() {
        let file = settings_file("\n");
        let parsed = read_settings(file.path()).expect("defaults");
        assert!(parsed.keybindings.is_empty());
        assert!(parsed.refresh_ms.is_none());
    }
}
