//! chartd - modular metrics collector
//!
//! A long-running plugin process that discovers, schedules and drives
//! independent collectors, and streams their charts to a host agent over
//! stdout.
//!
//! # Architecture
//!
//! - **Chart model**: charts, dimensions, labels and variables ([`chart`])
//! - **Probes**: HTTP, DNS, Unix socket and procfs clients ([`probe`])
//! - **Collectors**: the uniform contract plus bundled modules ([`collector`])
//! - **Jobs**: one configured collector instance and its lifecycle ([`job`])
//! - **Scheduler**: worker pool driving every job's ticks ([`scheduler`])
//! - **Sink**: chart/sample output, wire format or in memory ([`sink`])
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chartd::job::JobSpec;
//! use chartd::scheduler::{Scheduler, SchedulerConfig};
//! use chartd::sink::wire::WireSink;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (sink, writer) = WireSink::spawn(std::io::stdout(), 1024)?;
//!     let scheduler = Scheduler::new(SchedulerConfig::default(), Arc::new(sink.clone())).start();
//!
//!     let spec = JobSpec::new("bind", "local")
//!         .with_config(serde_json::json!({"url": "http://127.0.0.1:8653/json/v1"}));
//!     scheduler.submit(spec).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     scheduler.shutdown().await;
//!     sink.shutdown().await?;
//!     let _ = writer.join();
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod chart;
pub mod collector;
pub mod config;
pub mod discovery;
pub mod job;
pub mod matcher;
pub mod probe;
pub mod scheduler;
pub mod sink;

pub use chart::{Chart, ChartSet, Dim};
pub use collector::{Collector, CollectorError, Context, ErrorKind, Registry};
pub use job::{JobSpec, JobState};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
