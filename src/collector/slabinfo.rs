//! Kernel slab allocator collector.
//!
//! Reads `/proc/slabinfo` and charts object counts and memory per cache.
//! Caches are charted as they appear and dropped when they vanish.

mod collector;

pub use collector::{SlabinfoCollector, SlabinfoConfig};

use crate::collector::{Collector, Creator, Defaults};

/// Registry entry. Runs as a default job once enabled; reading
/// `/proc/slabinfo` needs root, so the module is off unless asked for.
pub fn creator() -> Creator {
    Creator::new(|| Box::new(SlabinfoCollector::default()) as Box<dyn Collector>)
        .with_defaults(Defaults::default().with_default_job(true).with_disabled(true))
        .with_description("Kernel slab allocator statistics")
}
