//! Configuration loading with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_iterations: {0}. Must be positive")]
    InvalidMaxIterations(u32),

    #[error("Invalid max_time_seconds: {0}. Must be positive")]
    InvalidMaxTime(u64),

    #[error("Invalid max_budget: {0}. Must be positive")]
    InvalidMaxBudget(f64),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Data directory cannot be empty")]
    EmptyDataDir,

    #[error("Invalid capability timeout: {0}. Must be positive")]
    InvalidCapabilityTimeout(u64),

    #[error("Environment variable error: {0}")]
    EnvVar(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .conductor/config.yaml (project config)
    /// 3. Environment variables (CONDUCTOR_* prefix)
    /// 4. Bare safety/environment overrides (MAX_ITERATIONS, MAX_TIME_SECONDS,
    ///    MAX_BUDGET, ENVIRONMENT, LOG_LEVEL)
    pub fn load() -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".conductor/config.yaml"))
            .merge(Env::prefixed("CONDUCTOR_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::apply_bare_env(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::apply_bare_env(&mut config)?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Apply the unprefixed environment overrides the deployment contract
    /// names.
    fn apply_bare_env(config: &mut Config) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("MAX_ITERATIONS") {
            config.safety.max_iterations = v
                .parse()
                .map_err(|_| ConfigError::EnvVar(format!("MAX_ITERATIONS={v}")))?;
        }
        if let Ok(v) = std::env::var("MAX_TIME_SECONDS") {
            config.safety.max_time_seconds = v
                .parse()
                .map_err(|_| ConfigError::EnvVar(format!("MAX_TIME_SECONDS={v}")))?;
        }
        if let Ok(v) = std::env::var("MAX_BUDGET") {
            config.safety.max_budget = v
                .parse()
                .map_err(|_| ConfigError::EnvVar(format!("MAX_BUDGET={v}")))?;
        }
        if let Ok(v) = std::env::var("ENVIRONMENT") {
            config.environment = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            config.logging.level = v.to_lowercase();
        }
        Ok(())
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.safety.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(
                config.safety.max_iterations,
            ));
        }

        if config.safety.max_time_seconds == 0 {
            return Err(ConfigError::InvalidMaxTime(config.safety.max_time_seconds));
        }

        if config.safety.max_budget <= 0.0 {
            return Err(ConfigError::InvalidMaxBudget(config.safety.max_budget));
        }

        if config.state.data_dir.is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }

        if config.engine.capability_timeout_seconds == 0 {
            return Err(ConfigError::InvalidCapabilityTimeout(
                config.engine.capability_timeout_seconds,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let mut config = Config::default();
        config.safety.max_iterations = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxIterations(0))
        ));
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_negative_budget_rejected() {
        let mut config = Config::default();
        config.safety.max_budget = -1.0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxBudget(_))
        ));
    }

    #[test]
    fn test_bare_env_overrides() {
        let mut config = Config::default();
        std::env::set_var("MAX_ITERATIONS", "7");
        std::env::set_var("LOG_LEVEL", "DEBUG");
        ConfigLoader::apply_bare_env(&mut config).unwrap();
        std::env::remove_var("MAX_ITERATIONS");
        std::env::remove_var("LOG_LEVEL");

        assert_eq!(config.safety.max_iterations, 7);
        assert_eq!(config.logging.level, "debug");
    }
}
