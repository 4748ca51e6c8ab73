//! TOML-based configuration for shardplan.
//!
//! Supports a config file (shardplan.toml) with environment variable
//! expansion in path values.
//!
//! Example configuration:
//! ```toml
//! [planner]
//! simplify_outer_joins = true
//! push_down_limits = true
//! push_down_aggregates = true
//! group_by_index_access = true
//!
//! [output]
//! plan_dir = "${HOME}/plans"
//! format = "json"
//!
//! [logging]
//! filter = "shardplan=debug"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub planner: PlannerSettings,
    pub output: OutputSettings,
    pub logging: LoggingSettings,
}

/// Optimizations the assembler may apply. Turning one off never changes
/// query results, only plan shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// Convert null-rejected LEFT joins to INNER joins.
    pub simplify_outer_joins: bool,

    /// Push a per-partition LIMIT below the send/receive pair.
    pub push_down_limits: bool,

    /// Split aggregates into per-partition and coordinator halves.
    pub push_down_aggregates: bool,

    /// Replace a sequential scan feeding a GROUP BY with an index scan.
    pub group_by_index_access: bool,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            simplify_outer_joins: true,
            push_down_limits: true,
            push_down_aggregates: true,
            group_by_index_access: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Where and how finished plans are written.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory for winning plans (supports ${ENV_VAR} expansion).
    pub plan_dir: Option<String>,

    pub format: OutputFormat,
}

impl OutputSettings {
    /// The plan directory with environment variables expanded.
    pub fn resolved_plan_dir(&self) -> Result<Option<PathBuf>, SettingsError> {
        self.plan_dir
            .as_deref()
            .map(|dir| expand_env_vars(dir).map(PathBuf::from))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `SHARDPLAN_CONFIG`
    /// 2. `./shardplan.toml`
    /// 3. `<config dir>/shardplan/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("SHARDPLAN_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("shardplan.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("shardplan").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                var_name.push(ch);
            }
            if var_name.is_empty() {
                // lone $
                result.push('$');
                continue;
            }
        }
        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
