//! BIND statistics-channel collector.
//!
//! Supports the JSON (`/json/v1`) and XML (`/xml/v3`) statistics
//! endpoints; the URL path suffix picks the decoder.

mod charts;
mod collector;
mod json;
mod xml;

pub use collector::{BindCollector, BindConfig};
pub use json::{Resolver, ServerStats, View};

use crate::collector::{Collector, Creator, Defaults};

/// Registry entry.
pub fn creator() -> Creator {
    Creator::new(|| Box::new(BindCollector::default()) as Box<dyn Collector>)
        .with_defaults(Defaults::default())
        .with_description("BIND 9 server statistics")
}
