//! Plugin configuration (`chartd.yaml`).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collector::{Defaults, Registry};
use crate::job::DEFAULT_MAX_FAILURES;
use crate::scheduler::{DEFAULT_MAX_WORKERS, SchedulerConfig, default_workers};

use super::validation::ConfigError;

/// File name of the plugin config inside the config directory.
pub const PLUGIN_CONFIG_FILE: &str = "chartd.yaml";

/// Default sink queue capacity, in ticks.
pub const DEFAULT_SINK_CAPACITY: usize = 1024;

fn default_true() -> bool {
    true
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_max_failures() -> u32 {
    DEFAULT_MAX_FAILURES
}

fn default_sink_capacity() -> usize {
    DEFAULT_SINK_CAPACITY
}

/// Top-level plugin configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Master switch. A disabled plugin exits right after startup.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Run modules that are not listed under `modules`.
    #[serde(default = "default_true")]
    pub default_run: bool,

    /// Worker count (default: CPU parallelism, capped by `max_workers`).
    #[serde(default)]
    pub workers: Option<usize>,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Consecutive failed ticks before a job is demoted.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Ticks the sink may queue before dropping.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,

    /// Per-module enable switches.
    #[serde(default)]
    pub modules: BTreeMap<String, bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_run: true,
            workers: None,
            max_workers: DEFAULT_MAX_WORKERS,
            max_failures: DEFAULT_MAX_FAILURES,
            sink_capacity: DEFAULT_SINK_CAPACITY,
            modules: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load the plugin config from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `chartd.yaml` from the config directory; a missing file means
    /// all defaults.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = dir.as_ref().join(PLUGIN_CONFIG_FILE);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no plugin config, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::ValidationError(
                "max_workers must be positive".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::ValidationError(
                "workers must be positive".to_string(),
            ));
        }
        if self.max_failures == 0 {
            return Err(ConfigError::ValidationError(
                "max_failures must be positive".to_string(),
            ));
        }
        if self.sink_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "sink_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n.clamp(1, self.max_workers),
            None => default_workers(self.max_workers),
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .with_workers(self.worker_count())
            .with_max_failures(self.max_failures)
    }

    /// Whether a module runs. An explicit `modules` entry wins; otherwise
    /// a module marked disabled in the registry stays off and the rest
    /// follow `default_run`.
    pub fn module_enabled(&self, name: &str, defaults: &Defaults) -> bool {
        match self.modules.get(name) {
            Some(&enabled) => enabled,
            None => self.default_run && !defaults.disabled,
        }
    }

    /// Enabled modules of the registry, sorted by name.
    pub fn enabled_modules(&self, registry: &Registry) -> Vec<String> {
        registry
            .iter()
            .filter(|(name, creator)| self.module_enabled(name, &creator.defaults))
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.enabled);
        assert!(config.default_run);
        assert_eq!(config.max_workers, 32);
        assert_eq!(config.max_failures, 10);
        assert_eq!(config.sink_capacity, 1024);
        assert!(config.worker_count() >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_count_is_capped() {
        let config = AppConfig {
            workers: Some(64),
            max_workers: 4,
            ..Default::default()
        };
        assert_eq!(config.worker_count(), 4);
        assert_eq!(config.scheduler_config().workers, 4);
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        for yaml in [
            "max_workers: 0",
            "workers: 0",
            "max_failures: 0",
            "sink_capacity: 0",
        ] {
            let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("must be positive"), "{yaml}: {err}");
        }
    }

    #[test]
    fn test_module_enablement() {
        let config: AppConfig = serde_yaml::from_str(
            "default_run: true\nmodules:\n  bind: false\n  slabinfo: true\n",
        )
        .unwrap();
        let registry = Registry::builtin();

        let enabled = config.enabled_modules(&registry);
        assert!(!enabled.contains(&"bind".to_string()));
        assert!(enabled.contains(&"slabinfo".to_string()));
        assert!(enabled.contains(&"portcheck".to_string()));

        let off: AppConfig = serde_yaml::from_str("default_run: false").unwrap();
        assert!(off.enabled_modules(&registry).is_empty());
    }

    #[test]
    fn test_disabled_module_needs_explicit_enable() {
        let config = AppConfig::default();
        let defaults = Defaults::default().with_disabled(true);
        assert!(!config.module_enabled("slabinfo", &defaults));
    }

    #[test]
    fn test_load_from_dir_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config, AppConfig::default());

        std::fs::write(dir.path().join(PLUGIN_CONFIG_FILE), "max_failures: 3\n").unwrap();
        let config = AppConfig::load_from_dir(dir.path()).unwrap();
        assert_eq!(config.max_failures, 3);
    }
}
