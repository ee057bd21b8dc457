//! Job discovery.
//!
//! Turns the config directory into job specs for the scheduler.
//!
//! # Components
//!
//! - [`FileDiscovery`]: one `<module>.yaml` (or `.yml`) per module in the
//!   config directory
//! - [`DefaultDiscovery`]: a single job named after the module, for modules
//!   that have no file and whose registry entry asks for a default job

use std::path::{Path, PathBuf};

use crate::collector::Registry;
use crate::config::{ConfigError, ModuleConfig};
use crate::job::JobSpec;

/// Source of job specs.
pub trait Discovery: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Job specs for the given enabled modules. Per-module problems are
    /// logged and skipped.
    fn discover(&self, modules: &[String]) -> Vec<JobSpec>;
}

/// Path of a module's config file, if one exists.
fn module_file(dir: &Path, module: &str) -> Option<PathBuf> {
    ["yaml", "yml"]
        .iter()
        .map(|ext| dir.join(format!("{module}.{ext}")))
        .find(|p| p.is_file())
}

/// Reads module files from the config directory.
#[derive(Debug, Clone)]
pub struct FileDiscovery {
    dir: PathBuf,
    registry: Registry,
}

impl FileDiscovery {
    pub fn new(dir: impl Into<PathBuf>, registry: Registry) -> Self {
        Self {
            dir: dir.into(),
            registry,
        }
    }

    /// Job specs of one module file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the module is unknown or the file is
    /// unreadable or invalid.
    pub fn load_module(&self, module: &str, path: &Path) -> Result<Vec<JobSpec>, ConfigError> {
        let creator = self.registry.get(module).ok_or_else(|| {
            ConfigError::ValidationError(format!("unknown module '{module}'"))
        })?;
        let source = path.display().to_string();
        let specs = ModuleConfig::load(path)?
            .job_configs(module)?
            .into_iter()
            .map(|job| job.into_spec(module, &creator.defaults, source.clone()))
            .collect();
        Ok(specs)
    }
}

impl Discovery for FileDiscovery {
    fn name(&self) -> &'static str {
        "file"
    }

    fn discover(&self, modules: &[String]) -> Vec<JobSpec> {
        let mut specs = Vec::new();
        for module in modules {
            let Some(path) = module_file(&self.dir, module) else {
                continue;
            };
            match self.load_module(module, &path) {
                Ok(found) => {
                    tracing::debug!(module = %module, path = %path.display(), jobs = found.len(), "loaded module config");
                    specs.extend(found);
                }
                Err(e) => {
                    tracing::error!(module = %module, path = %path.display(), error = %e, "invalid module config");
                }
            }
        }
        specs
    }
}

/// Default jobs for modules without a config file.
#[derive(Debug, Clone)]
pub struct DefaultDiscovery {
    dir: PathBuf,
    registry: Registry,
}

impl DefaultDiscovery {
    pub fn new(dir: impl Into<PathBuf>, registry: Registry) -> Self {
        Self {
            dir: dir.into(),
            registry,
        }
    }
}

impl Discovery for DefaultDiscovery {
    fn name(&self) -> &'static str {
        "default"
    }

    fn discover(&self, modules: &[String]) -> Vec<JobSpec> {
        modules
            .iter()
            .filter(|module| module_file(&self.dir, module).is_none())
            .filter_map(|module| {
                let creator = self.registry.get(module)?;
                creator.defaults.default_job.then(|| {
                    JobSpec::from_defaults(module.as_str(), module.as_str(), &creator.defaults)
                        .with_source("default")
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_file_discovery() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("portcheck.yaml"),
            "jobs:\n  - name: ssh\n    host: 127.0.0.1\n    ports: [22]\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("bind.yml"), "jobs:\n  - name: local\n").unwrap();
        std::fs::write(dir.path().join("httpcheck.yaml"), "jobs: [{name: ''}]\n").unwrap();

        let discovery = FileDiscovery::new(dir.path(), Registry::builtin());
        let specs = discovery.discover(&modules(&["bind", "httpcheck", "portcheck", "dns_query"]));
        let names: Vec<String> = specs.iter().map(JobSpec::full_name).collect();
        assert_eq!(names, ["bind_local", "portcheck_ssh"]);
        assert!(specs[1].source.ends_with("portcheck.yaml"));
        assert_eq!(specs[1].config["ports"][0], 22);
    }

    #[test]
    fn test_load_module_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.yaml");
        std::fs::write(&path, "jobs: []\n").unwrap();
        let discovery = FileDiscovery::new(dir.path(), Registry::builtin());
        let err = discovery.load_module("nope", &path).unwrap_err();
        assert!(err.to_string().contains("unknown module 'nope'"));
    }

    #[test]
    fn test_default_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let discovery = DefaultDiscovery::new(dir.path(), Registry::builtin());

        let specs = discovery.discover(&modules(&["slabinfo", "portcheck"]));
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].full_name(), "slabinfo");
        assert_eq!(specs[0].source, "default");

        std::fs::write(dir.path().join("slabinfo.yaml"), "jobs: []\n").unwrap();
        assert!(discovery.discover(&modules(&["slabinfo"])).is_empty());
    }
}
