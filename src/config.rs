use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::agent::{AgentId, AgentRole};
use crate::{Error, Result};

/// Orchestrator loop, admission and executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period between orchestrator ticks.
    pub tick_interval_ms: u64,
    /// Delay before the next tick after a tick-level error.
    pub error_backoff_ms: u64,
    /// Concurrency ceiling used for the system load ratio.
    pub max_concurrent: usize,
    /// Admission is refused while system load is at or above this value.
    pub load_ceiling: f64,
    /// Maximum queued tasks considered for admission per tick.
    pub admission_batch: usize,
    /// Simulated I/O yield between executor phases.
    pub phase_delay_ms: u64,
    /// A phase that runs longer than this fails with a timeout error.
    pub phase_timeout_ms: u64,
    /// Retries per phase for tool and timeout errors.
    pub max_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            error_backoff_ms: 10_000,
            max_concurrent: 5,
            load_ceiling: 0.8,
            admission_batch: 3,
            phase_delay_ms: 250,
            phase_timeout_ms: 30_000,
            max_retries: 2,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn phase_delay(&self) -> Duration {
        Duration::from_millis(self.phase_delay_ms)
    }

    pub fn phase_timeout(&self) -> Duration {
        Duration::from_millis(self.phase_timeout_ms)
    }
}

/// Task store retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum terminal tasks kept in history.
    pub history_limit: usize,
    /// Age after which terminal tasks are purged by `cleanup_old_tasks`.
    pub retention_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            retention_secs: 24 * 60 * 60,
        }
    }
}

impl StoreConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_secs as i64)
    }
}

/// Adaptive task generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    /// A living instance without updates for this long is stale.
    pub stale_after_secs: u64,
    /// A living instance with any metric below this value is stale.
    pub metric_floor: f64,
    pub transform_agents: Vec<AgentId>,
    pub optimize_agents: Vec<AgentId>,
    pub ui_agents: Vec<AgentId>,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_after_secs: 10 * 60,
            metric_floor: 0.7,
            transform_agents: vec![AgentId::from("scanner"), AgentId::from("adapter")],
            optimize_agents: vec![AgentId::from("optimizer")],
            ui_agents: vec![AgentId::from("designer"), AgentId::from("adapter")],
        }
    }
}

impl AdaptiveConfig {
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.stale_after_secs as i64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub adaptive: AdaptiveConfig,
    #[serde(default = "AgentRole::default_roster")]
    pub agents: Vec<AgentRole>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            adaptive: AdaptiveConfig::default(),
            agents: AgentRole::default_roster(),
        }
    }
}

impl Config {
    pub fn taskgraph_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".taskgraph"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::taskgraph_dir()?.join("taskgraph.toml"))
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            agents = config.agents.len(),
            max_concurrent = config.scheduler.max_concurrent,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            return Err(Error::Validation(
                "scheduler.max_concurrent must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.scheduler.load_ceiling) {
            return Err(Error::Validation(format!(
                "scheduler.load_ceiling must be within [0, 1], got {}",
                self.scheduler.load_ceiling
            )));
        }
        if self.store.history_limit == 0 {
            return Err(Error::Validation(
                "store.history_limit must be at least 1".to_string(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for role in &self.agents {
            if !seen.insert(&role.id) {
                return Err(Error::Validation(format!("duplicate agent id: {}", role.id)));
            }
        }
        Ok(())
    }
}
