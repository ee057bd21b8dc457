//! DNS query probe collector.
//!
//! Resolves one domain per tick against every configured server and
//! record type, charting the outcome and round-trip time of each query.

mod charts;
mod collector;

pub use charts::server_charts;
pub use collector::{DnsQueryCollector, DnsQueryConfig};

use crate::collector::{Collector, Creator, Defaults};

/// Registry entry.
pub fn creator() -> Creator {
    Creator::new(|| Box::new(DnsQueryCollector::default()) as Box<dyn Collector>)
        .with_defaults(Defaults::default().with_update_every(std::time::Duration::from_secs(5)))
        .with_description("DNS query round-trip time and status")
}
