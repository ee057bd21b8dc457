//! TCP port probe collector.
//!
//! - [`PortCheckCollector`]: TCP port connectivity and connection latency

mod collector;

pub use collector::{PortCheckCollector, PortCheckConfig};

use crate::collector::{Collector, Creator, Defaults};

/// Registry entry.
pub fn creator() -> Creator {
    Creator::new(|| Box::new(PortCheckCollector::default()) as Box<dyn Collector>)
        .with_defaults(Defaults::default().with_update_every(std::time::Duration::from_secs(5)))
        .with_description("TCP port availability and connection latency")
}
