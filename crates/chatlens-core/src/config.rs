use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

const CONFIG_DIR_NAME: &str = "chatlens";
const CONFIG_FILE_NAME: &str = "config.toml";
const PREFERENCES_FILE_NAME: &str = "preferences.toml";
const CURRENT_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Result returned by [`load_config`], capturing the source and any non-fatal issues.
#[derive(Debug, Clone)]
pub struct ConfigLoadResult {
    pub config: AppConfig,
    pub warnings: Vec<String>,
    pub source: ConfigSource,
}

/// Indicates where the configuration was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    /// No persisted configuration was found or usable; defaults were synthesized.
    Default,
    /// Configuration was read from `config.toml`.
    File,
}

/// Errors that can occur when persisting configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML serialization error: {0}")]
    Ser(#[from] toml::ser::Error),
}

/// Disk-backed configuration schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "AppConfig::schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub api: ApiPreferences,
    #[serde(default)]
    pub accounts: AccountPreferences,
    #[serde(default)]
    pub storage: StoragePreferences,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            api: ApiPreferences::default(),
            accounts: AccountPreferences::default(),
            storage: StoragePreferences::default(),
        }
    }
}

impl AppConfig {
    const fn schema_version() -> u32 {
        CURRENT_SCHEMA_VERSION
    }

    /// Path of the preference store, honouring `storage.preferences_path`.
    pub fn preferences_path(&self) -> PathBuf {
        match self.storage.preferences_path.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => PathBuf::from(shellexpand::tilde(raw).into_owned()),
            _ => config_directory().join(PREFERENCES_FILE_NAME),
        }
    }
}

/// Connection settings for the local chat service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiPreferences {
    #[serde(default = "ApiPreferences::default_base_url")]
    pub base_url: String,
    #[serde(default = "ApiPreferences::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiPreferences {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ApiPreferences {
    fn default_base_url() -> String {
        DEFAULT_API_BASE_URL.to_string()
    }

    const fn default_timeout_secs() -> u64 {
        DEFAULT_TIMEOUT_SECS
    }
}

/// Behaviour of the account bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPreferences {
    /// Drop the remembered account when the account list cannot be fetched.
    #[serde(default = "AccountPreferences::default_clear_preference_on_failure")]
    pub clear_preference_on_failure: bool,
}

impl Default for AccountPreferences {
    fn default() -> Self {
        Self {
            clear_preference_on_failure: true,
        }
    }
}

impl AccountPreferences {
    const fn default_clear_preference_on_failure() -> bool {
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePreferences {
    #[serde(default)]
    pub preferences_path: Option<String>,
}

/// Represents overrides sourced from runtime inputs (CLI flags).
#[derive(Debug, Default, Clone)]
pub struct RuntimeOverrides {
    pub api_base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub preferences_path: Option<String>,
}

impl RuntimeOverrides {
    pub fn is_empty(&self) -> bool {
        self.api_base_url.is_none() && self.timeout_secs.is_none() && self.preferences_path.is_none()
    }
}

/// Path to the configuration directory.
pub fn config_directory() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Path to `config.toml`.
pub fn config_path() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Load the configuration, falling back to defaults.
pub fn load_config() -> ConfigLoadResult {
    load_config_from(config_path())
}

/// Load the configuration stored at `path`.
pub fn load_config_from(path: PathBuf) -> ConfigLoadResult {
    let mut warnings = Vec::new();

    if path.exists() {
        match fs::read_to_string(&path) {
            Ok(raw) => match toml::from_str::<AppConfig>(&raw) {
                Ok(cfg) => {
                    let (cfg, mut sanitize_warnings) = sanitize_config(cfg);
                    warnings.append(&mut sanitize_warnings);
                    return ConfigLoadResult {
                        config: cfg,
                        warnings,
                        source: ConfigSource::File,
                    };
                }
                Err(err) => {
                    warnings.push(format!(
                        "Failed to parse {} as TOML: {}. Falling back to defaults.",
                        path.display(),
                        err
                    ));
                }
            },
            Err(err) => {
                warnings.push(format!(
                    "Failed to read {}: {}. Falling back to defaults.",
                    path.display(),
                    err
                ));
            }
        }
    }

    ConfigLoadResult {
        config: AppConfig::default(),
        warnings,
        source: ConfigSource::Default,
    }
}

/// Persist the configuration to disk.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    save_config_to(config, config_path())
}

pub fn save_config_to(config: &AppConfig, path: PathBuf) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = toml::to_string_pretty(config)?;
    fs::write(path, serialized)?;
    Ok(())
}

fn sanitize_config(mut config: AppConfig) -> (AppConfig, Vec<String>) {
    let mut warnings = Vec::new();

    if config.schema_version != CURRENT_SCHEMA_VERSION {
        warnings.push(format!(
            "Unknown config schema version {}. Resetting to {}.",
            config.schema_version, CURRENT_SCHEMA_VERSION
        ));
        return (AppConfig::default(), warnings);
    }

    let base_url = config.api.base_url.trim().trim_end_matches('/').to_string();
    if base_url.is_empty() {
        warnings.push(format!(
            "api.base_url is empty. Resetting to {}.",
            DEFAULT_API_BASE_URL
        ));
        config.api.base_url = DEFAULT_API_BASE_URL.to_string();
    } else if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
        warnings.push(format!(
            "api.base_url '{}' is not an http(s) URL. Resetting to {}.",
            base_url, DEFAULT_API_BASE_URL
        ));
        config.api.base_url = DEFAULT_API_BASE_URL.to_string();
    } else {
        config.api.base_url = base_url;
    }

    if config.api.timeout_secs == 0 {
        warnings.push(format!(
            "api.timeout_secs must be at least 1. Resetting to {}.",
            DEFAULT_TIMEOUT_SECS
        ));
        config.api.timeout_secs = DEFAULT_TIMEOUT_SECS;
    }

    if let Some(ref path) = config.storage.preferences_path {
        if path.trim().is_empty() {
            config.storage.preferences_path = None;
        }
    }

    (config, warnings)
}

/// Apply CLI overrides on top of the loaded configuration.
pub fn apply_runtime_overrides(
    config: &mut AppConfig,
    overrides: &RuntimeOverrides,
    warnings: &mut Vec<String>,
) {
    if let Some(base_url) = overrides.api_base_url.as_deref() {
        let trimmed = base_url.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            config.api.base_url = trimmed.to_string();
        } else {
            warnings.push(format!(
                "Ignoring --api-base '{}': expected an http(s) URL.",
                base_url
            ));
        }
    }

    if let Some(timeout) = overrides.timeout_secs {
        if timeout == 0 {
            warnings.push("Ignoring --timeout 0: must be at least 1 second.".to_string());
        } else {
            config.api.timeout_secs = timeout;
        }
    }

    if let Some(path) = overrides.preferences_path.as_deref() {
        if !path.trim().is_empty() {
            config.storage.preferences_path = Some(path.trim().to_string());
        }
    }
}
