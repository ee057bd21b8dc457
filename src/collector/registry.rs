//! Process-wide catalogue of collector modules.
//!
//! The registry is built once at startup and is read-only afterwards.

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use thiserror::Error;

use crate::collector::Collector;

/// Default update interval (1 second).
pub const DEFAULT_UPDATE_EVERY: Duration = Duration::from_secs(1);
/// Default chart priority.
pub const DEFAULT_PRIORITY: u32 = 70000;
/// Default wait before re-checking a failed job (60 seconds).
pub const DEFAULT_AUTODETECTION_RETRY: Duration = Duration::from_secs(60);

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Name already taken.
    #[error("collector '{0}' is already registered")]
    Duplicate(String),

    /// Name is empty or not lowercase `[a-z0-9_]`.
    #[error("invalid collector name '{0}'")]
    InvalidName(String),
}

/// Default scheduling descriptor of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Defaults {
    pub update_every: Duration,
    pub priority: u32,
    pub autodetection_retry: Duration,
    /// Run one job named after the module when no config file exists.
    pub default_job: bool,
    /// Skip the module unless explicitly enabled.
    pub disabled: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            update_every: DEFAULT_UPDATE_EVERY,
            priority: DEFAULT_PRIORITY,
            autodetection_retry: DEFAULT_AUTODETECTION_RETRY,
            default_job: false,
            disabled: false,
        }
    }
}

impl Defaults {
    pub fn with_update_every(mut self, update_every: Duration) -> Self {
        self.update_every = update_every;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_default_job(mut self, default_job: bool) -> Self {
        self.default_job = default_job;
        self
    }

    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }
}

/// Constructor and descriptor of one module.
#[derive(Clone)]
pub struct Creator {
    pub create: fn() -> Box<dyn Collector>,
    pub defaults: Defaults,
    pub description: &'static str,
}

impl Creator {
    pub fn new(create: fn() -> Box<dyn Collector>) -> Self {
        Self {
            create,
            defaults: Defaults::default(),
            description: "",
        }
    }

    pub fn with_defaults(mut self, defaults: Defaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }
}

impl std::fmt::Debug for Creator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Creator")
            .field("defaults", &self.defaults)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Module name to [`Creator`] map.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, Creator>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled module.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let modules = [
            ("bind", super::bind::creator()),
            ("dns_query", super::dnsquery::creator()),
            ("httpcheck", super::httpcheck::creator()),
            ("portcheck", super::portcheck::creator()),
            ("slabinfo", super::slabinfo::creator()),
        ];
        for (name, creator) in modules {
            if let Err(e) = registry.register(name, creator) {
                tracing::error!(module = %name, error = %e, "Failed to register bundled module");
            }
        }
        registry
    }

    /// The process-wide registry, populated with the bundled modules on
    /// first access.
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Self::builtin)
    }

    /// Add a module.
    ///
    /// # Errors
    /// Fails on a duplicate or malformed name.
    pub fn register(&mut self, name: &str, creator: Creator) -> Result<(), RegistryError> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if self.entries.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.entries.insert(name.to_string(), creator);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Creator> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Creator)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_modules() {
        let registry = Registry::builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(
            names,
            vec!["bind", "dns_query", "httpcheck", "portcheck", "slabinfo"]
        );

        let slabinfo = registry.get("slabinfo").unwrap();
        assert!(slabinfo.defaults.default_job);
        assert!(slabinfo.defaults.disabled);
    }

    #[test]
    fn test_constructor_yields_fresh_instance() {
        let registry = Registry::builtin();
        for (name, creator) in registry.iter() {
            let collector = (creator.create)();
            assert_eq!(collector.name(), name);
            assert!(collector.charts().is_empty());
        }
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = Registry::new();
        let creator = Registry::builtin().get("portcheck").unwrap().clone();
        registry.register("portcheck", creator.clone()).unwrap();
        assert_eq!(
            registry.register("portcheck", creator),
            Err(RegistryError::Duplicate("portcheck".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_invalid_name() {
        let mut registry = Registry::new();
        let creator = Registry::builtin().get("portcheck").unwrap().clone();
        assert!(registry.register("", creator.clone()).is_err());
        assert!(registry.register("Port-Check", creator).is_err());
    }

    #[test]
    fn test_global_is_shared() {
        let a = Registry::global() as *const Registry;
        let b = Registry::global() as *const Registry;
        assert_eq!(a, b);
        assert!(Registry::global().contains("dns_query"));
    }
}
