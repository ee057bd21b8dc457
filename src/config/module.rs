//! Module config files (`<module>.yaml`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::collector::{Defaults, MIN_UPDATE_EVERY};
use crate::job::JobSpec;

use super::validation::{ConfigError, expand_env_vars_in_value, parse_duration};

/// One module file: top-level keys are defaults for every job.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub jobs: Vec<Map<String, Value>>,

    #[serde(flatten)]
    pub defaults: Map<String, Value>,
}

/// A job entry with the framework keys pulled out of its bag.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub name: String,
    pub update_every: Option<Duration>,
    /// Zero disables retries.
    pub autodetection_retry: Option<Duration>,
    pub priority: Option<u32>,
    /// Full merged bag handed to the collector.
    pub bag: Value,
}

impl ModuleConfig {
    /// Load a module file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Merge every job over the module defaults and validate the framework
    /// keys.
    ///
    /// # Errors
    /// Fails on a missing, empty or duplicate name, or a malformed
    /// framework key.
    pub fn job_configs(&self, module: &str) -> Result<Vec<JobConfig>, ConfigError> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.jobs.len());

        for (idx, job) in self.jobs.iter().enumerate() {
            let mut merged = self.defaults.clone();
            merged.extend(job.iter().map(|(k, v)| (k.clone(), v.clone())));
            let mut bag = Value::Object(merged);
            expand_env_vars_in_value(&mut bag);

            let config = JobConfig::from_bag(bag).map_err(|message| ConfigError::InvalidJob {
                module: module.to_string(),
                message: format!("job #{}: {message}", idx + 1),
            })?;
            if !seen.insert(config.name.clone()) {
                return Err(ConfigError::InvalidJob {
                    module: module.to_string(),
                    message: format!("duplicate job name '{}'", config.name),
                });
            }
            out.push(config);
        }
        Ok(out)
    }
}

impl JobConfig {
    fn from_bag(bag: Value) -> Result<Self, String> {
        let name = match bag.get("name") {
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(Value::String(_)) => return Err("'name' is empty".to_string()),
            Some(Value::Number(n)) => n.to_string(),
            Some(_) => return Err("'name' must be a string".to_string()),
            None => return Err("'name' is not set".to_string()),
        };

        let update_every = seconds(&bag, "update_every")?;
        if let Some(every) = update_every {
            if every < MIN_UPDATE_EVERY {
                return Err(format!(
                    "'update_every' must be at least {}s",
                    MIN_UPDATE_EVERY.as_secs()
                ));
            }
        }
        let autodetection_retry = seconds(&bag, "autodetection_retry")?;
        let priority = match bag.get("priority") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .and_then(|p| u32::try_from(p).ok())
                    .ok_or_else(|| format!("'priority' must be a non-negative integer, got {v}"))?,
            ),
        };

        Ok(Self {
            name,
            update_every,
            autodetection_retry,
            priority,
            bag,
        })
    }

    /// Job spec for `module`, falling back to the module's registry
    /// defaults for unset keys.
    pub fn into_spec(self, module: &str, defaults: &Defaults, source: impl Into<String>) -> JobSpec {
        let mut spec = JobSpec::from_defaults(module, self.name, defaults)
            .with_config(self.bag)
            .with_source(source);
        if let Some(every) = self.update_every {
            spec = spec.with_update_every(every);
        }
        if let Some(retry) = self.autodetection_retry {
            spec = spec.with_autodetection_retry(retry);
        }
        if let Some(priority) = self.priority {
            spec = spec.with_priority(priority);
        }
        spec
    }
}

/// Whole seconds, or a humantime string such as `"30s"`.
fn seconds(bag: &Value, key: &str) -> Result<Option<Duration>, String> {
    match bag.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|s| Some(Duration::from_secs(s)))
            .ok_or_else(|| format!("'{key}' must be a non-negative integer, got {n}")),
        Some(Value::String(s)) => parse_duration(s)
            .map(Some)
            .map_err(|e| format!("'{key}': {e}")),
        Some(v) => Err(format!("'{key}' must be seconds, got {v}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(yaml: &str) -> ModuleConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_job_overrides_module_defaults() {
        let config = parse(
            r#"
update_every: 5
timeout: 2
jobs:
  - name: local
    host: 127.0.0.1
    ports: [22, 80]
  - name: remote
    host: 10.0.0.1
    ports: [443]
    update_every: 10
    autodetection_retry: 0
    priority: 1000
"#,
        );
        let jobs = config.job_configs("portcheck").unwrap();
        assert_eq!(jobs.len(), 2);

        assert_eq!(jobs[0].name, "local");
        assert_eq!(jobs[0].update_every, Some(Duration::from_secs(5)));
        assert_eq!(jobs[0].bag["timeout"], 2);
        assert_eq!(jobs[0].bag["ports"], json!([22, 80]));

        assert_eq!(jobs[1].update_every, Some(Duration::from_secs(10)));
        assert_eq!(jobs[1].autodetection_retry, Some(Duration::ZERO));
        assert_eq!(jobs[1].priority, Some(1000));
    }

    #[test]
    fn test_into_spec_uses_registry_defaults() {
        let config = parse("jobs:\n  - name: local\n    host: 127.0.0.1\n");
        let job = config.job_configs("portcheck").unwrap().remove(0);
        let defaults = Defaults::default().with_update_every(Duration::from_secs(3));
        let spec = job.into_spec("portcheck", &defaults, "/etc/chartd/portcheck.yaml");

        assert_eq!(spec.module, "portcheck");
        assert_eq!(spec.name, "local");
        assert_eq!(spec.update_every, Duration::from_secs(3));
        assert_eq!(spec.priority, defaults.priority);
        assert_eq!(spec.source, "/etc/chartd/portcheck.yaml");
        assert_eq!(spec.config["host"], "127.0.0.1");
    }

    #[test]
    fn test_humantime_durations() {
        let config = parse("jobs:\n  - name: a\n    update_every: 1m\n    autodetection_retry: 30s\n");
        let job = &config.job_configs("bind").unwrap()[0];
        assert_eq!(job.update_every, Some(Duration::from_secs(60)));
        assert_eq!(job.autodetection_retry, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_invalid_jobs() {
        let cases = [
            ("jobs:\n  - host: x\n", "'name' is not set"),
            ("jobs:\n  - name: ''\n", "'name' is empty"),
            ("jobs:\n  - name: a\n  - name: a\n", "duplicate job name 'a'"),
            ("jobs:\n  - name: a\n    update_every: 0\n", "'update_every' must be at least 1s"),
            ("jobs:\n  - name: a\n    update_every: -1\n", "non-negative"),
            ("jobs:\n  - name: a\n    priority: high\n", "'priority'"),
        ];
        for (yaml, expected) in cases {
            let err = parse(yaml).job_configs("bind").unwrap_err();
            assert!(err.to_string().contains(expected), "{yaml}: {err}");
            assert!(err.to_string().starts_with("module 'bind'"));
        }
    }

    #[test]
    fn test_env_expansion() {
        let config = parse(
            "jobs:\n  - name: api\n    url: 'http://127.0.0.1:${CHARTD_TEST_UNSET_PORT:-8080}/health'\n",
        );
        let job = &config.job_configs("httpcheck").unwrap()[0];
        assert_eq!(job.bag["url"], "http://127.0.0.1:8080/health");
    }

    #[test]
    fn test_load_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bind.yaml");
        std::fs::write(&path, "").unwrap();
        let config = ModuleConfig::load(&path).unwrap();
        assert!(config.jobs.is_empty());
        assert!(ModuleConfig::load(dir.path().join("missing.yaml")).is_err());
    }
}
