//! Configuration loading and environment variable handling

use crate::domains::HookletConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "HOOKLET".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<HookletConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: HookletConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<HookletConfig> {
        let mut config = HookletConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<HookletConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut HookletConfig) -> ConfigResult<()> {
        self.apply_engine_overrides(&mut config.engine)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply engine config overrides
    fn apply_engine_overrides(
        &self,
        config: &mut crate::domains::engine::EngineConfig,
    ) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("SCRIPT_TIMEOUT_MS") {
            let millis: u64 = timeout
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid SCRIPT_TIMEOUT_MS: {}", e)))?;
            config.default_script_timeout = std::time::Duration::from_millis(millis);
        }

        if let Ok(min) = self.get_env_var("POOL_MIN") {
            config.pool.min = min
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid POOL_MIN: {}", e)))?;
        }

        if let Ok(max) = self.get_env_var("POOL_MAX") {
            config.pool.max = max
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid POOL_MAX: {}", e)))?;
        }

        if let Ok(acquire) = self.get_env_var("POOL_ACQUIRE_TIMEOUT_MS") {
            let millis: u64 = acquire.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid POOL_ACQUIRE_TIMEOUT_MS: {}", e))
            })?;
            config.pool.acquire_timeout = std::time::Duration::from_millis(millis);
        }

        if let Ok(runner) = self.get_env_var("RUNNER_PATH") {
            config.pool.runner.path = Some(runner.into());
        }

        if let Ok(memory) = self.get_env_var("RUNNER_MAX_MEMORY_MB") {
            config.pool.runner.max_memory_mb = memory.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid RUNNER_MAX_MEMORY_MB: {}", e))
            })?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            use std::str::FromStr;
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            use std::str::FromStr;
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
