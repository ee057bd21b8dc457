//! Collector Layer
//!
//! The uniform contract every data source implements, the registry that
//! maps module names to constructors, and the bundled modules.
//!
//! # Architecture
//!
//! - [`Collector`]: core trait (`configure`, `init`, `check`, `collect`, `cleanup`)
//! - [`Context`]: per-call cancellation, deadline and partial-failure counter
//! - [`Registry`]: process-wide module catalogue
//!
//! # Example
//!
//! ```rust,no_run
//! use chartd::collector::{Context, Registry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let creator = Registry::global().get("portcheck").expect("bundled");
//! let mut collector = (creator.create)();
//! collector.configure(&serde_json::json!({"host": "127.0.0.1", "ports": [22]}))?;
//! collector.init(&Context::new("portcheck_local")).await?;
//! # Ok(())
//! # }
//! ```

pub mod bind;
pub mod dnsquery;
pub mod httpcheck;
pub mod portcheck;
pub mod registry;
pub mod slabinfo;
mod traits;

pub use registry::{Creator, Defaults, Registry, RegistryError};
pub use traits::{
    Collector, CollectorError, Context, ErrorKind, MIN_UPDATE_EVERY, Samples, decode_config,
};
