//! HTTP endpoint probe collector.
//!
//! - [`HttpCheckCollector`]: response status, time and length, with an
//!   optional body regex

mod collector;

pub use collector::{HttpCheckCollector, HttpCheckConfig};

use crate::collector::{Collector, Creator, Defaults};

/// Registry entry.
pub fn creator() -> Creator {
    Creator::new(|| Box::new(HttpCheckCollector::default()) as Box<dyn Collector>)
        .with_defaults(Defaults::default().with_update_every(std::time::Duration::from_secs(5)))
        .with_description("HTTP endpoint availability and response time")
}
