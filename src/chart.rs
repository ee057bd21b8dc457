//! Chart Model
//!
//! Value types describing what a job publishes: charts, their dimensions,
//! labels and variables, plus the keyed [`ChartSet`] a collector owns.
//!
//! # Components
//!
//! - [`Chart`] / [`Dim`]: chart and dimension records with structural validation
//! - [`ChartSet`]: constant-time by-ID collection with stable iteration order
//! - [`ChartTemplate`]: immutable template instantiated per discovered target
//!
//! # Example
//!
//! ```
//! use chartd::chart::{Chart, ChartSet, ChartType, Dim};
//!
//! let chart = Chart::new("requests", "Requests", "requests/s", "requests", "web.requests")
//!     .with_type(ChartType::Stacked)
//!     .with_dim(Dim::new("get").incremental())
//!     .with_dim(Dim::new("post").incremental());
//!
//! let mut charts = ChartSet::new();
//! charts.add(chart).unwrap();
//! assert!(charts.has("requests"));
//! ```

mod set;
mod template;
mod types;

pub use set::ChartSet;
pub use template::{ChartTemplate, canonical_id, canonicalize};
pub use types::{
    Chart, ChartError, ChartOpts, ChartType, Dim, DimAlgo, DimOpts, Label, LabelSource, Var,
};
