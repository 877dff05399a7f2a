//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Log levels accepted in the `log_level` field (case-insensitive)
pub const VALID_LOG_LEVELS: &[&str] = &["TRACE", "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL"];

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading or writing a config file
    Io(std::io::Error),
    /// JSON parsing or serialization error
    Json(serde_json::Error),
    /// YAML parsing or serialization error
    Yaml(serde_yaml::Error),
    /// TOML parsing error
    Toml(toml::de::Error),
    /// TOML serialization error
    TomlSerialize(toml::ser::Error),
    /// File extension is not one of .yaml, .yml, .json or .toml
    UnsupportedFormat(String),
    /// Configuration parsed but failed validation
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Json(e) => write!(f, "Failed to parse JSON config: {}", e),
            ConfigError::Yaml(e) => write!(f, "Failed to parse YAML config: {}", e),
            ConfigError::Toml(e) => write!(f, "Failed to parse TOML config: {}", e),
            ConfigError::TomlSerialize(e) => write!(f, "Failed to serialize TOML config: {}", e),
            ConfigError::UnsupportedFormat(ext) => write!(
                f,
                "Unsupported config format '{}'. Use .yaml, .yml, .json or .toml",
                ext
            ),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Json(e) => Some(e),
            ConfigError::Yaml(e) => Some(e),
            ConfigError::Toml(e) => Some(e),
            ConfigError::TomlSerialize(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(e: toml::ser::Error) -> Self {
        ConfigError::TomlSerialize(e)
    }
}

/// On-disk config format, chosen by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

impl ConfigFormat {
    /// Detect the format from a path's extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "yaml" | "yml" => Ok(ConfigFormat::Yaml),
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }
}

/// How a rule pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    /// Shell-style wildcard, `*.mov`
    #[default]
    Glob,
    /// Regular expression anchored at the start of the filename
    Regex,
    /// Exact filename
    Exact,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::Glob => write!(f, "glob"),
            PatternType::Regex => write!(f, "regex"),
            PatternType::Exact => write!(f, "exact"),
        }
    }
}

/// A rule mapping a filename pattern to an encoding profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleConfig {
    pub pattern: String,
    pub profile: String,
    /// Output filename template; `{filename}`, `{filename_no_ext}` and `{stem}` are substituted
    #[serde(default = "default_output_pattern")]
    pub output_pattern: String,
    #[serde(default)]
    pub pattern_type: PatternType,
    /// Higher priority rules are checked first
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Delete the input after a successful transcode
    #[serde(default = "default_true")]
    pub delete_input: bool,
}

impl RuleConfig {
    /// Create a glob rule with default output pattern and priority
    pub fn new(pattern: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            profile: profile.into(),
            output_pattern: default_output_pattern(),
            pattern_type: PatternType::Glob,
            priority: default_priority(),
            delete_input: true,
        }
    }
}

fn default_output_pattern() -> String {
    "{filename}".to_string()
}

fn default_priority() -> i64 {
    100
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_max_attempts() -> u32 {
    1
}

/// Main configuration structure for the monitor service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorConfig {
    /// Directory watched for incoming video files
    #[serde(default)]
    pub watch_directory: PathBuf,
    /// Base directory for transcoded output
    #[serde(default)]
    pub output_directory: PathBuf,
    /// Seconds between scans
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// Delete inputs after successful transcode (combined with each rule's flag)
    #[serde(default = "default_true")]
    pub delete_input: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Queue state file; the queue is in-memory only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    /// Extension allow-list override, e.g. `[".mov", ".mp4"]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    /// Skip dotfiles such as macOS `._clip.mov` resource forks
    #[serde(default = "default_true")]
    pub ignore_hidden: bool,
    /// How many times a file is attempted before it is given up on
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Bind address for the HTTP status endpoint, e.g. `127.0.0.1:7878`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_address: Option<String>,
}

impl MonitorConfig {
    /// Create a config with defaults for everything but the two directories
    pub fn new(watch_directory: impl Into<PathBuf>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            watch_directory: watch_directory.into(),
            output_directory: output_directory.into(),
            poll_interval: default_poll_interval(),
            delete_input: true,
            log_level: default_log_level(),
            persist_path: None,
            log_file: None,
            rules: Vec::new(),
            extensions: None,
            ignore_hidden: true,
            max_attempts: default_max_attempts(),
            status_address: None,
        }
    }

    /// Load configuration from a YAML, JSON or TOML file
    ///
    /// Relative paths inside the file are resolved against the file's directory.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path)?;
        let mut config = Self::parse_str(&content, format)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_relative_paths(base);
        Ok(config)
    }

    /// Parse configuration from a string in the given format
    pub fn parse_str(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Yaml => Self::parse_yaml(content),
            ConfigFormat::Json => Self::parse_json(content),
            ConfigFormat::Toml => Ok(toml::from_str(content)?),
        }
    }

    /// Parse configuration from a YAML string
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Parse configuration from a JSON string
    pub fn parse_json(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    /// Rebase every relative path field onto `base`
    pub fn resolve_relative_paths(&mut self, base: &Path) {
        let resolve = |p: &Path| -> PathBuf {
            if p.as_os_str().is_empty() || p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };

        self.watch_directory = resolve(&self.watch_directory);
        self.output_directory = resolve(&self.output_directory);
        self.persist_path = self.persist_path.as_deref().map(resolve);
        self.log_file = self.log_file.as_deref().map(resolve);
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - BULLETPROOF_WATCH_DIRECTORY -> watch_directory
    /// - BULLETPROOF_OUTPUT_DIRECTORY -> output_directory
    /// - BULLETPROOF_POLL_INTERVAL -> poll_interval
    /// - BULLETPROOF_DELETE_INPUT -> delete_input
    /// - BULLETPROOF_LOG_LEVEL -> log_level
    /// - BULLETPROOF_STATUS_ADDRESS -> status_address
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("BULLETPROOF_WATCH_DIRECTORY") {
            if !val.is_empty() {
                self.watch_directory = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("BULLETPROOF_OUTPUT_DIRECTORY") {
            if !val.is_empty() {
                self.output_directory = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("BULLETPROOF_POLL_INTERVAL") {
            if let Ok(secs) = val.parse::<u64>() {
                self.poll_interval = secs;
            }
        }

        if let Ok(val) = env::var("BULLETPROOF_DELETE_INPUT") {
            // Accept "true", "1", "yes" as true; "false", "0", "no" as false
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" => self.delete_input = true,
                "false" | "0" | "no" => self.delete_input = false,
                _ => {} // Invalid value, keep existing
            }
        }

        if let Ok(val) = env::var("BULLETPROOF_LOG_LEVEL") {
            if !val.is_empty() {
                self.log_level = val;
            }
        }

        if let Ok(val) = env::var("BULLETPROOF_STATUS_ADDRESS") {
            self.status_address = if val.is_empty() { None } else { Some(val) };
        }
    }

    /// Validate the configuration, failing closed on anything the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("watch_directory is required".to_string()));
        }
        if !self.watch_directory.exists() {
            return Err(ConfigError::Invalid(format!(
                "Watch directory does not exist: {}",
                self.watch_directory.display()
            )));
        }
        if !self.watch_directory.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "Watch directory is not a directory: {}",
                self.watch_directory.display()
            )));
        }
        if self.output_directory.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output_directory is required".to_string()));
        }

        if self.rules.is_empty() {
            return Err(ConfigError::Invalid("at least one rule is required".to_string()));
        }
        for (i, rule) in self.rules.iter().enumerate() {
            if rule.pattern.is_empty() {
                return Err(ConfigError::Invalid(format!("Rule {}: pattern is required", i)));
            }
            if rule.profile.is_empty() {
                return Err(ConfigError::Invalid(format!("Rule {}: profile is required", i)));
            }
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_uppercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log_level: {}. Use: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        if self.poll_interval == 0 {
            return Err(ConfigError::Invalid("poll_interval must be at least 1 second".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }

        Ok(())
    }

    /// Load configuration from file, apply environment overrides, and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Poll interval as a `Duration`
    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    /// Map `log_level` onto a tracing filter directive
    ///
    /// WARNING maps to `warn` and CRITICAL to `error`; unknown values fall back to `info`.
    pub fn log_directive(&self) -> &'static str {
        match self.log_level.to_uppercase().as_str() {
            "TRACE" => "trace",
            "DEBUG" => "debug",
            "WARNING" | "WARN" => "warn",
            "ERROR" | "CRITICAL" => "error",
            _ => "info",
        }
    }

    /// Example configuration used by `init-config`
    pub fn example() -> Self {
        let mut config = Self::new("./incoming", "./output");

        config.rules = vec![
            RuleConfig {
                output_pattern: "{filename_no_ext}_qlab.mov".to_string(),
                ..RuleConfig::new("*_live.mov", "live-qlab")
            },
            RuleConfig {
                output_pattern: "masters/{filename}".to_string(),
                priority: 90,
                ..RuleConfig::new("archive_*.mov", "archival")
            },
            RuleConfig {
                output_pattern: "{filename_no_ext}_converted.mp4".to_string(),
                priority: 1,
                ..RuleConfig::new("*.mov", "standard-playback")
            },
        ];
        config
    }

    /// Serialize to a string in the given format
    pub fn to_string_as(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        match format {
            ConfigFormat::Yaml => Ok(serde_yaml::to_string(self)?),
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            ConfigFormat::Toml => Ok(toml::to_string_pretty(self)?),
        }
    }

    /// Write the configuration to `path`, format chosen by extension
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let format = ConfigFormat::from_path(path)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, self.to_string_as(format)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("BULLETPROOF_WATCH_DIRECTORY");
        env::remove_var("BULLETPROOF_OUTPUT_DIRECTORY");
        env::remove_var("BULLETPROOF_POLL_INTERVAL");
        env::remove_var("BULLETPROOF_DELETE_INPUT");
        env::remove_var("BULLETPROOF_LOG_LEVEL");
        env::remove_var("BULLETPROOF_STATUS_ADDRESS");
    }

    fn valid_config(watch: &Path) -> MonitorConfig {
        let mut config = MonitorConfig::new(watch, watch.join("out"));
        config.rules.push(RuleConfig::new("*.mov", "live-qlab"));
        config
    }

    const YAML_CONFIG: &str = r#"
watch_directory: ./incoming
output_directory: ./output
poll_interval: 10
delete_input: false
log_level: debug
persist_path: state/queue.json
rules:
  - pattern: "*_live.mov"
    profile: live-qlab
    output_pattern: "{filename_no_ext}_qlab.mov"
    priority: 100
  - pattern: "^clip_\\d+"
    pattern_type: regex
    profile: stream-hd
"#;

    #[test]
    fn test_parse_yaml_with_defaults() {
        let config = MonitorConfig::parse_yaml(YAML_CONFIG).expect("Valid YAML should parse");

        assert_eq!(config.watch_directory, PathBuf::from("./incoming"));
        assert_eq!(config.poll_interval, 10);
        assert!(!config.delete_input);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.rules.len(), 2);

        let first = &config.rules[0];
        assert_eq!(first.pattern_type, PatternType::Glob);
        assert_eq!(first.output_pattern, "{filename_no_ext}_qlab.mov");
        assert!(first.delete_input);

        let second = &config.rules[1];
        assert_eq!(second.pattern_type, PatternType::Regex);
        assert_eq!(second.priority, 100); // default
        assert_eq!(second.output_pattern, "{filename}"); // default

        // Supplementary fields fall back to defaults
        assert!(config.ignore_hidden);
        assert_eq!(config.max_attempts, 1);
        assert!(config.extensions.is_none());
        assert!(config.status_address.is_none());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "watch_directory": "/srv/in",
            "output_directory": "/srv/out",
            "rules": [{"pattern": "show.mov", "pattern_type": "exact", "profile": "archival", "priority": 5}]
        }"#;
        let config = MonitorConfig::parse_json(json).expect("Valid JSON should parse");

        assert_eq!(config.poll_interval, 5);
        assert!(config.delete_input);
        assert_eq!(config.log_level, "INFO");
        assert_eq!(config.rules[0].pattern_type, PatternType::Exact);
        assert_eq!(config.rules[0].priority, 5);
    }

    #[test]
    fn test_load_resolves_relative_paths_against_config_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("bulletproof.yaml");
        fs::write(&config_path, YAML_CONFIG).unwrap();

        let config = MonitorConfig::load_from_file(&config_path).expect("Should load");

        assert_eq!(config.watch_directory, temp_dir.path().join("./incoming"));
        assert_eq!(config.output_directory, temp_dir.path().join("./output"));
        assert_eq!(
            config.persist_path,
            Some(temp_dir.path().join("state/queue.json"))
        );
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let mut config = MonitorConfig::new("/abs/in", "relative/out");
        config.resolve_relative_paths(Path::new("/etc/bulletproof"));

        assert_eq!(config.watch_directory, PathBuf::from("/abs/in"));
        assert_eq!(config.output_directory, PathBuf::from("/etc/bulletproof/relative/out"));
    }

    #[test]
    fn test_unsupported_format() {
        let result = ConfigFormat::from_path(Path::new("config.ini"));
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(ext)) if ext == "ini"));

        assert_eq!(ConfigFormat::from_path(Path::new("a.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")).unwrap(), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")).unwrap(), ConfigFormat::Toml);
    }

    #[test]
    fn test_parse_toml() {
        let content = r#"
watch_directory = "/media/incoming"
output_directory = "/media/output"
poll_interval = 3

[[rules]]
pattern = "*_live.mov"
profile = "live-qlab"
priority = 50
"#;
        let config = MonitorConfig::parse_str(content, ConfigFormat::Toml).unwrap();

        assert_eq!(config.poll_interval, 3);
        assert!(config.delete_input);
        assert_eq!(config.rules.len(), 1);
        assert_eq!(config.rules[0].priority, 50);
        assert_eq!(config.rules[0].pattern_type, PatternType::Glob);
        assert_eq!(config.rules[0].output_pattern, "{filename}");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = MonitorConfig::load_from_file("/nonexistent/bulletproof.yaml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_validate_accepts_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        assert!(valid_config(temp_dir.path()).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_watch_directory() {
        let temp_dir = TempDir::new().unwrap();
        let config = valid_config(&temp_dir.path().join("nonexistent"));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate_rejects_watch_directory_that_is_a_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not_a_dir.mov");
        fs::write(&file, b"x").unwrap();

        let err = valid_config(&file).validate().unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn test_validate_rejects_empty_watch_directory_field() {
        let json = r#"{"output_directory": "/tmp", "rules": [{"pattern": "*", "profile": "x"}]}"#;
        let config = MonitorConfig::parse_json(json).unwrap();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("watch_directory is required"));
    }

    #[test]
    fn test_validate_rejects_zero_rules() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = valid_config(temp_dir.path());
        config.rules.clear();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at least one rule"));
    }

    #[test]
    fn test_validate_rejects_rule_without_profile() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = valid_config(temp_dir.path());
        config.rules.push(RuleConfig::new("*.mp4", ""));

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Rule 1: profile is required"));
    }

    #[test]
    fn test_validate_rejects_invalid_log_level() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = valid_config(temp_dir.path());
        config.log_level = "LOUD".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("Invalid log_level"));
    }

    #[test]
    fn test_validate_rejects_zero_poll_interval() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = valid_config(temp_dir.path());
        config.poll_interval = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_directive_mapping() {
        let mut config = MonitorConfig::new("/in", "/out");
        for (level, directive) in [
            ("DEBUG", "debug"),
            ("info", "info"),
            ("Warning", "warn"),
            ("WARN", "warn"),
            ("ERROR", "error"),
            ("CRITICAL", "error"),
            ("trace", "trace"),
        ] {
            config.log_level = level.to_string();
            assert_eq!(config.log_directive(), directive, "level {}", level);
        }
    }

    #[test]
    fn test_example_config_saves_and_loads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/example.yaml");

        MonitorConfig::example().save(&path).expect("Should save example");
        let loaded = MonitorConfig::load_from_file(&path).expect("Should load example");

        assert_eq!(loaded.rules.len(), 3);
        assert_eq!(loaded.rules[0].pattern, "*_live.mov");
        assert_eq!(loaded.rules[1].output_pattern, "masters/{filename}");
        assert_eq!(loaded.rules[2].priority, 1);
        assert_eq!(loaded.watch_directory, temp_dir.path().join("nested/./incoming"));
    }

    #[test]
    fn test_load_fails_closed_on_validation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bulletproof.json");
        // watch directory "./incoming" does not exist under temp_dir
        MonitorConfig::example().save(&path).unwrap();

        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();
        assert!(matches!(MonitorConfig::load(&path), Err(ConfigError::Invalid(_))));

        fs::create_dir_all(temp_dir.path().join("incoming")).unwrap();
        assert!(MonitorConfig::load(&path).is_ok());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_env_overrides_poll_interval(
            initial in 1u64..600,
            override_secs in 1u64..3600,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = MonitorConfig::new("/in", "/out");
            config.poll_interval = initial;

            env::set_var("BULLETPROOF_POLL_INTERVAL", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.poll_interval, override_secs);
        }

        #[test]
        fn prop_env_overrides_delete_input(
            initial in proptest::bool::ANY,
            override_value in proptest::bool::ANY,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = MonitorConfig::new("/in", "/out");
            config.delete_input = initial;

            env::set_var("BULLETPROOF_DELETE_INPUT", override_value.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.delete_input, override_value);
        }

        #[test]
        fn prop_invalid_env_values_keep_existing(
            initial_interval in 1u64..600,
            garbage in "[a-z]{1,8}",
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = MonitorConfig::new("/in", "/out");
            config.poll_interval = initial_interval;

            env::set_var("BULLETPROOF_POLL_INTERVAL", &garbage);
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.poll_interval, initial_interval);
        }
    }

    #[test]
    fn test_env_overrides_directories_and_level() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = MonitorConfig::new("/in", "/out");
        env::set_var("BULLETPROOF_WATCH_DIRECTORY", "/mnt/drop");
        env::set_var("BULLETPROOF_OUTPUT_DIRECTORY", "/mnt/done");
        env::set_var("BULLETPROOF_LOG_LEVEL", "ERROR");
        env::set_var("BULLETPROOF_STATUS_ADDRESS", "127.0.0.1:9000");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.watch_directory, PathBuf::from("/mnt/drop"));
        assert_eq!(config.output_directory, PathBuf::from("/mnt/done"));
        assert_eq!(config.log_level, "ERROR");
        assert_eq!(config.status_address.as_deref(), Some("127.0.0.1:9000"));
    }
}
