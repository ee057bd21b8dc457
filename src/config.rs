//! Configuration loading.
//!
//! Two kinds of YAML files live in the config directory:
//! - `chartd.yaml`: plugin settings (workers, failure threshold, sink
//!   capacity, which modules run)
//! - `<module>.yaml`: module-level defaults plus a `jobs:` list of job bags

mod app;
mod module;
mod validation;

pub use app::{AppConfig, DEFAULT_SINK_CAPACITY, PLUGIN_CONFIG_FILE};
pub use module::{JobConfig, ModuleConfig};
pub use validation::{ConfigError, expand_env_vars, expand_env_vars_in_value, parse_duration};
