//! Script engine and worker pool configuration

use crate::error::ConfigResult;
use crate::validation::{validate_bounds, validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Script engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Time budget applied when a caller does not supply one
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_script_timeout")]
    pub default_script_timeout: Duration,
}

/// Worker pool sizing and lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Minimum number of worker processes kept alive
    #[serde(default = "default_min_workers")]
    pub min: usize,

    /// Maximum number of worker processes
    #[serde(default = "default_max_workers")]
    pub max: usize,

    /// Idle workers above `min` are destroyed after this long without work
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// How long an acquirer waits for a free worker before pool exhaustion
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,

    /// Interval between idle-worker eviction sweeps
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_eviction_interval")]
    pub eviction_interval: Duration,

    /// Ping each worker before handing it out
    #[serde(default = "crate::domains::utils::default_true")]
    pub validate_on_borrow: bool,

    /// Runner process configuration
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Runner (worker entry point) process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Path to the runner binary; when unset, a `hooklet-worker` binary next
    /// to the current executable is used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Hard memory ceiling passed to the runner at process start, in MiB
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            default_script_timeout: default_script_timeout(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: default_min_workers(),
            max: default_max_workers(),
            idle_timeout: default_idle_timeout(),
            acquire_timeout: default_acquire_timeout(),
            eviction_interval: default_eviction_interval(),
            validate_on_borrow: true,
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_memory_mb: default_max_memory_mb(),
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.default_script_timeout.as_millis() as u64,
            "default_script_timeout",
            self.domain_name(),
        )?;
        self.pool.validate()
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.min, "min", self.domain_name())?;
        validate_positive(self.max, "max", self.domain_name())?;
        validate_bounds(self.min, self.max, "min", "max", self.domain_name())?;
        validate_positive(
            self.acquire_timeout.as_millis() as u64,
            "acquire_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.idle_timeout.as_millis() as u64,
            "idle_timeout",
            self.domain_name(),
        )?;
        validate_positive(
            self.eviction_interval.as_millis() as u64,
            "eviction_interval",
            self.domain_name(),
        )?;
        validate_positive(self.runner.max_memory_mb, "runner.max_memory_mb", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine.pool"
    }
}

// Default value functions
fn default_script_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    4
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_eviction_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_max_memory_mb() -> u64 {
    256
}
