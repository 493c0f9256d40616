use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config parse error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("required configuration missing: {fields:?}")]
    MissingFields { fields: Vec<String> },

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Client configuration, one TOML table per concern.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub account: AccountConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    /// Base URL of the message archive endpoint.
    #[serde(default = "default_history_url")]
    pub base_url: String,
    /// Messages fetched per page when scrolling back.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_history_url(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    /// Desktop notifications for private messages outside the open thread.
    #[serde(default = "default_true")]
    pub notifications: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            notifications: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_history_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

fn default_page_size() -> u32 {
    20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

const DEFAULT_CONFIG_TOML: &str = r#"[account]
username = ""

[history]
base_url = "http://127.0.0.1:3000"
page_size = 20

[ui]
notifications = true

[logging]
# one of: trace, debug, info, warn, error
level = "info"

[event_bus]
channel_capacity = 1024
"#;

/// Environment overrides applied on top of the parsed file. Each knob has a
/// `SHOAL_*` variable so deployments can avoid editing the file.
#[derive(Debug, Default, Clone)]
struct EnvOverrides {
    username: Option<String>,
    history_url: Option<String>,
    log_level: Option<String>,
}

impl EnvOverrides {
    fn from_env() -> Self {
        Self {
            username: std::env::var("SHOAL_USERNAME").ok(),
            history_url: std::env::var("SHOAL_HISTORY_URL").ok(),
            log_level: std::env::var("SHOAL_LOG_LEVEL").ok(),
        }
    }

    fn apply(self, config: &mut Config) {
        if let Some(username) = self.username {
            config.account.username = username;
        }
        if let Some(url) = self.history_url {
            config.history.base_url = url;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

/// The platform-appropriate configuration file path.
pub fn config_path() -> PathBuf {
    match directories::ProjectDirs::from("com", "shoal", "shoal") {
        Some(dirs) => dirs.config_dir().join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

/// Load and validate configuration from the platform path, with `SHOAL_*`
/// environment variables taking precedence over file values.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(config_path())
}

/// Same as [`load_config`] but from an explicit path. A missing file is
/// seeded with a commented default and reported as missing required fields,
/// so a first run tells the user exactly what to fill in.
pub fn load_config_from(path: PathBuf) -> Result<Config, ConfigError> {
    load(&path, EnvOverrides::from_env())
}

fn load(path: &Path, overrides: EnvOverrides) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse(&contents, overrides),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            write_default_config(path)?;
            Err(ConfigError::MissingFields {
                fields: vec!["account.username".to_string()],
            })
        }
        Err(e) => Err(ConfigError::Io(e)),
    }
}

fn parse(toml_str: &str, overrides: EnvOverrides) -> Result<Config, ConfigError> {
    let mut config: Config = toml::from_str(toml_str).map_err(|e| parse_error(toml_str, e))?;
    overrides.apply(&mut config);
    validate(&config)?;
    Ok(config)
}

fn parse_error(toml_str: &str, error: toml::de::Error) -> ConfigError {
    let (line, column) = match error.span() {
        Some(span) => position_of(toml_str, span.start),
        None => (0, 0),
    };
    ConfigError::Parse {
        line,
        column,
        message: error.message().to_string(),
    }
}

/// 1-based line and column of a byte offset.
fn position_of(text: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut line_start = 0;
    for (i, c) in text.char_indices() {
        if i >= offset {
            break;
        }
        if c == '\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    (line, offset - line_start + 1)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.account.username.is_empty() {
        return Err(ConfigError::MissingFields {
            fields: vec!["account.username".to_string()],
        });
    }

    if !VALID_LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::InvalidValue {
            field: "logging.level".to_string(),
            message: format!("must be one of: {}", VALID_LOG_LEVELS.join(", ")),
        });
    }

    if config.history.page_size == 0 {
        return Err(ConfigError::InvalidValue {
            field: "history.page_size".to_string(),
            message: "must be at least 1".to_string(),
        });
    }

    Ok(())
}

fn write_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TOML)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_no_env(toml_str: &str) -> Result<Config, ConfigError> {
        parse(toml_str, EnvOverrides::default())
    }

    fn minimal_toml() -> &'static str {
        r#"
[account]
username = "seabird"
"#
    }

    // ── Parsing ───────────────────────────────────────────────────

    #[test]
    fn parses_full_config() {
        let toml = r#"
[account]
username = "seabird"

[history]
base_url = "https://chat.example.com"
page_size = 50

[ui]
notifications = false

[logging]
level = "debug"

[event_bus]
channel_capacity = 256
"#;
        let config = parse_no_env(toml).unwrap();
        assert_eq!(config.account.username, "seabird");
        assert_eq!(config.history.base_url, "https://chat.example.com");
        assert_eq!(config.history.page_size, 50);
        assert!(!config.ui.notifications);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.event_bus.channel_capacity, 256);
    }

    #[test]
    fn minimal_config_fills_defaults() {
        let config = parse_no_env(minimal_toml()).unwrap();
        assert_eq!(config.account.username, "seabird");
        assert_eq!(config.history.base_url, "http://127.0.0.1:3000");
        assert_eq!(config.history.page_size, 20);
        assert!(config.ui.notifications);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.event_bus.channel_capacity, 1024);
    }

    #[test]
    fn parses_checked_in_minimal_fixture() {
        let fixture = shoal_test_support::fixtures::config("minimal-config.toml");
        let config = parse_no_env(&fixture).unwrap();
        assert_eq!(config.account.username, "seabird");
    }

    // ── Validation ────────────────────────────────────────────────

    #[test]
    fn empty_username_is_missing() {
        let toml = r#"
[account]
username = ""
"#;
        match parse_no_env(toml).unwrap_err() {
            ConfigError::MissingFields { fields } => {
                assert_eq!(fields, vec!["account.username".to_string()]);
            }
            other => panic!("expected MissingFields, got: {other}"),
        }
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let toml = r#"
[account]
username = "seabird"

[logging]
level = "verbose"
"#;
        match parse_no_env(toml).unwrap_err() {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "logging.level"),
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let toml = r#"
[account]
username = "seabird"

[history]
page_size = 0
"#;
        match parse_no_env(toml).unwrap_err() {
            ConfigError::InvalidValue { field, .. } => assert_eq!(field, "history.page_size"),
            other => panic!("expected InvalidValue, got: {other}"),
        }
    }

    #[test]
    fn every_valid_log_level_is_accepted() {
        for level in VALID_LOG_LEVELS {
            let toml = format!(
                r#"
[account]
username = "seabird"

[logging]
level = "{level}"
"#
            );
            parse_no_env(&toml).unwrap();
        }
    }

    // ── Malformed TOML ────────────────────────────────────────────

    #[test]
    fn broken_toml_is_a_parse_error() {
        let toml = r#"
[account
username = "broken"
"#;
        assert!(matches!(
            parse_no_env(toml).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn parse_error_reports_a_position() {
        let toml = r#"
[account]
username = "seabird"
bad_line ===
"#;
        match parse_no_env(toml).unwrap_err() {
            ConfigError::Parse { line, .. } => assert!(line > 1, "expected a line past 1, got {line}"),
            other => panic!("expected Parse, got: {other}"),
        }
    }

    #[test]
    fn position_of_counts_lines_and_columns() {
        let text = "ab\ncd\nef";
        assert_eq!(position_of(text, 0), (1, 1));
        assert_eq!(position_of(text, 4), (2, 2));
        assert_eq!(position_of(text, 6), (3, 1));
    }

    // ── Environment overrides ─────────────────────────────────────

    #[test]
    fn env_username_wins_over_file() {
        let overrides = EnvOverrides {
            username: Some("override".to_string()),
            ..Default::default()
        };
        let config = parse(minimal_toml(), overrides).unwrap();
        assert_eq!(config.account.username, "override");
    }

    #[test]
    fn env_history_url_wins_over_file() {
        let overrides = EnvOverrides {
            history_url: Some("https://env.example.com".to_string()),
            ..Default::default()
        };
        let config = parse(minimal_toml(), overrides).unwrap();
        assert_eq!(config.history.base_url, "https://env.example.com");
    }

    #[test]
    fn env_override_is_validated_too() {
        let overrides = EnvOverrides {
            log_level: Some("shouting".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            parse(minimal_toml(), overrides).unwrap_err(),
            ConfigError::InvalidValue { .. }
        ));
    }

    // ── File loading ──────────────────────────────────────────────

    #[test]
    fn loads_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, minimal_toml()).unwrap();

        let config = load(&path, EnvOverrides::default()).unwrap();
        assert_eq!(config.account.username, "seabird");
    }

    #[test]
    fn missing_file_is_seeded_with_a_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subdir").join("config.toml");

        match load(&path, EnvOverrides::default()).unwrap_err() {
            ConfigError::MissingFields { fields } => {
                assert_eq!(fields, vec!["account.username".to_string()]);
            }
            other => panic!("expected MissingFields, got: {other}"),
        }

        let seeded = std::fs::read_to_string(&path).expect("default config should exist");
        assert!(seeded.contains("[account]"));
        // The seeded file must itself be parseable once username is set.
        let filled = seeded.replace("username = \"\"", "username = \"seabird\"");
        parse(&filled, EnvOverrides::default()).unwrap();
    }

    #[test]
    fn config_path_ends_with_config_toml() {
        assert!(config_path().ends_with("config.toml"));
    }
}
