use std::path::PathBuf;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::chart::{Chart, ChartSet, ChartTemplate, ChartType, Dim, canonicalize};
use crate::collector::registry::DEFAULT_PRIORITY;
use crate::collector::{Collector, CollectorError, Context, Samples, decode_config};
use crate::matcher::{Matcher, matches_opt};
use crate::probe::procfs::Slabinfo;

const DEFAULT_PATH: &str = "/proc/slabinfo";

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_PATH)
}

/// Configuration for the slabinfo collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlabinfoConfig {
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Simple-pattern filter over cache names. Empty charts every cache.
    #[serde(default)]
    pub filter: String,
}

impl Default for SlabinfoConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            filter: String::new(),
        }
    }
}

fn objects_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "cache_{cache}_objects",
                "Slab Cache Objects",
                "objects",
                "{cache}",
                "slabinfo.objects",
            )
            .with_type(ChartType::Line)
            .with_priority(DEFAULT_PRIORITY)
            .with_label("cache", "{cache}")
            .with_dim(Dim::new("{key}_active_objs").with_name("active"))
            .with_dim(Dim::new("{key}_num_objs").with_name("total")),
        )
    })
}

fn memory_template() -> &'static ChartTemplate {
    static TMPL: OnceLock<ChartTemplate> = OnceLock::new();
    TMPL.get_or_init(|| {
        ChartTemplate::new(
            Chart::new(
                "cache_{cache}_memory",
                "Slab Cache Memory",
                "KiB",
                "{cache}",
                "slabinfo.memory",
            )
            .with_type(ChartType::Area)
            .with_priority(DEFAULT_PRIORITY + 1)
            .with_label("cache", "{cache}")
            .with_dim(Dim::new("{key}_active_memory").with_name("used").with_div(1024))
            .with_dim(Dim::new("{key}_memory").with_name("allocated").with_div(1024)),
        )
    })
}

fn cache_charts(cache: &str) -> Vec<Chart> {
    let key = canonicalize(cache);
    let subs = [("cache", cache), ("key", key.as_str())];
    vec![
        objects_template().instantiate(&subs),
        memory_template().instantiate(&subs),
    ]
}

/// Slab cache statistics collector.
#[derive(Debug, Default)]
pub struct SlabinfoCollector {
    config: SlabinfoConfig,
    charts: ChartSet,
    filter: Option<Matcher>,
    /// Canonical names of the caches that currently have charts.
    seen: Vec<String>,
}

impl SlabinfoCollector {
    pub fn new(config: SlabinfoConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    fn sync_charts(&mut self, slabinfo: &Slabinfo) -> Result<(), CollectorError> {
        let current: Vec<String> = slabinfo
            .0
            .keys()
            .filter(|name| matches_opt(self.filter.as_ref(), name))
            .cloned()
            .collect();

        for name in &current {
            for chart in cache_charts(name) {
                if !self.charts.has(&chart.id) {
                    tracing::debug!(cache = %name, chart = %chart.id, "adding slab cache chart");
                    self.charts.add(chart)?;
                }
            }
        }

        for gone in self.seen.iter().filter(|name| !current.contains(name)) {
            for chart in cache_charts(gone) {
                tracing::debug!(cache = %gone, chart = %chart.id, "removing slab cache chart");
                self.charts.remove(&chart.id);
            }
        }

        self.seen = current;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Collector for SlabinfoCollector {
    fn name(&self) -> &str {
        "slabinfo"
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<(), CollectorError> {
        self.config = decode_config(config)?;
        Ok(())
    }

    async fn init(&mut self, _ctx: &Context) -> Result<(), CollectorError> {
        if self.config.path.as_os_str().is_empty() {
            return Err(CollectorError::Config("'path' option not set".to_string()));
        }
        self.filter = Matcher::parse(&self.config.filter)
            .map_err(|e| CollectorError::Config(format!("invalid filter: {e}")))?;
        self.charts = ChartSet::new();
        self.seen.clear();
        Ok(())
    }

    async fn collect(&mut self, ctx: &Context) -> Result<Samples, CollectorError> {
        ctx.check()?;
        let slabinfo = ctx.run(Slabinfo::read(&self.config.path)).await??;
        self.sync_charts(&slabinfo)?;

        let mut mx = Samples::new();
        for name in &self.seen {
            let Some(cache) = slabinfo.0.get(name) else {
                continue;
            };
            let key = canonicalize(name);
            let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
            mx.insert(format!("{key}_active_objs"), clamp(cache.active_objs));
            mx.insert(format!("{key}_num_objs"), clamp(cache.num_objs));
            mx.insert(format!("{key}_active_memory"), clamp(cache.active_memory()));
            mx.insert(format!("{key}_memory"), clamp(cache.memory()));
        }
        Ok(mx)
    }

    fn charts(&self) -> &ChartSet {
        &self.charts
    }

    fn cleanup(&mut self) {}
}
