//! Configuration module for shardplan.
//!
//! Handles the TOML settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, LoggingSettings, OutputFormat, OutputSettings, PlannerSettings, Settings,
    SettingsError,
};
