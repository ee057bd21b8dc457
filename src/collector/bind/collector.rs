use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::charts::{
    OPCODES_CHART, QTYPES_CHART, base_charts, opcode_dim, opcodes_chart, qtype_dim, qtypes_chart,
    view_charts, view_qtype_dim, view_qtypes_chart,
};
use super::json::{self, ServerStats};
use super::xml;
use crate::chart::{Chart, ChartSet, Dim, canonicalize};
use crate::collector::{Collector, CollectorError, Context, Samples, decode_config};
use crate::matcher::Matcher;
use crate::probe::ProbeResult;
use crate::probe::http::{Dialect, HttpClient, RequestConfig};

const DEFAULT_URL: &str = "http://127.0.0.1:8653/json/v1";

fn default_request() -> RequestConfig {
    RequestConfig::new(DEFAULT_URL)
}

/// Configuration for the BIND collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    #[serde(flatten)]
    pub request: RequestConfig,
    /// Simple-pattern filter over view names. Empty charts every view.
    #[serde(default)]
    pub permit_view: String,
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            request: default_request(),
            permit_view: String::new(),
        }
    }
}

impl BindConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            request: RequestConfig::new(url),
            permit_view: String::new(),
        }
    }

    pub fn with_permit_view(mut self, expr: impl Into<String>) -> Self {
        self.permit_view = expr.into();
        self
    }
}

/// Statistics-channel client for one dialect.
#[derive(Debug)]
enum ApiClient {
    Json(HttpClient),
    Xml(HttpClient),
}

impl ApiClient {
    fn new(config: &RequestConfig) -> ProbeResult<Self> {
        let dialect = Dialect::from_url(&config.url)?;
        let client = HttpClient::new(config)?;
        Ok(match dialect {
            Dialect::JsonV1 => Self::Json(client),
            Dialect::XmlV3 => Self::Xml(client),
        })
    }

    fn dialect(&self) -> Dialect {
        match self {
            Self::Json(_) => Dialect::JsonV1,
            Self::Xml(_) => Dialect::XmlV3,
        }
    }

    async fn server_stats(&self) -> ProbeResult<ServerStats> {
        match self {
            Self::Json(client) => {
                let url = format!("{}/server", client.url().trim_end_matches('/'));
                let resp = client.fetch_url(&url).await?.ensure_success()?;
                json::parse(&resp)
            }
            Self::Xml(client) => {
                let url = format!("{}/server", client.url().trim_end_matches('/'));
                let resp = client.fetch_url(&url).await?.ensure_success()?;
                xml::parse(resp.text()?)
            }
        }
    }
}

/// BIND 9 statistics collector.
#[derive(Debug, Default)]
pub struct BindCollector {
    config: BindConfig,
    charts: ChartSet,
    client: Option<ApiClient>,
    permit_view: Option<Matcher>,
    /// Canonical view ID to the view that claimed it first.
    view_owners: HashMap<String, String>,
    skipped_views: HashSet<String>,
}

impl BindCollector {
    pub fn new(config: BindConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Dialect picked at init, if initialized.
    pub fn dialect(&self) -> Option<Dialect> {
        self.client.as_ref().map(ApiClient::dialect)
    }

    /// Compiled `permit_view` matcher, if any.
    pub fn permit_view(&self) -> Option<&Matcher> {
        self.permit_view.as_ref()
    }

    fn validate_config(&self) -> Result<(), CollectorError> {
        self.config.request.validate()?;
        Ok(())
    }

    fn init_permit_view_matcher(&self) -> Result<Option<Matcher>, CollectorError> {
        Matcher::parse(&self.config.permit_view)
            .map_err(|e| CollectorError::Config(format!("invalid permit_view: {e}")))
    }

    fn view_permitted(&self, view: &str) -> bool {
        crate::matcher::matches_opt(self.permit_view.as_ref(), view)
    }

    /// Add a dimensionless chart once it has something to show, then add
    /// any dimension it does not have yet.
    fn ensure_dims(
        &mut self,
        chart_id: &str,
        make_chart: impl FnOnce() -> Chart,
        dims: impl IntoIterator<Item = Dim>,
    ) -> Result<(), CollectorError> {
        let mut dims = dims.into_iter().peekable();
        if dims.peek().is_none() {
            return Ok(());
        }
        if let Some(chart) = self.charts.get_mut(chart_id) {
            for dim in dims {
                if !chart.has_dim(&dim.id) {
                    chart.add_dim(dim)?;
                }
            }
            return Ok(());
        }

        let mut chart = make_chart();
        for dim in dims {
            if !chart.has_dim(&dim.id) {
                chart.add_dim(dim)?;
            }
        }
        self.charts.add(chart)?;
        Ok(())
    }

    fn collect_server(&mut self, stats: &ServerStats, mx: &mut Samples) -> Result<(), CollectorError> {
        for (name, value) in &stats.nsstats {
            mx.insert(name.clone(), *value);
        }

        self.ensure_dims(
            OPCODES_CHART,
            opcodes_chart,
            stats.opcodes.keys().map(|op| opcode_dim(op)),
        )?;
        for (op, value) in &stats.opcodes {
            mx.insert(format!("opcode_{op}"), *value);
        }

        self.ensure_dims(
            QTYPES_CHART,
            qtypes_chart,
            stats.qtypes.keys().map(|qt| qtype_dim(qt)),
        )?;
        for (qt, value) in &stats.qtypes {
            mx.insert(format!("qtype_{qt}"), *value);
        }
        Ok(())
    }

    fn collect_views(&mut self, stats: &ServerStats, mx: &mut Samples) -> Result<(), CollectorError> {
        for (view, data) in &stats.views {
            if !self.view_permitted(view) {
                continue;
            }
            let resolver = &data.resolver;
            if resolver.stats.is_empty() && resolver.cachestats.is_empty() && resolver.qtypes.is_empty()
            {
                continue;
            }

            let key = canonicalize(view);
            match self.view_owners.get(&key) {
                Some(owner) if owner != view => {
                    if self.skipped_views.insert(view.clone()) {
                        tracing::warn!(
                            view = %view,
                            owner = %owner,
                            chart_id = %key,
                            "view chart ids collide with another view, skipping"
                        );
                    }
                    continue;
                }
                Some(_) => {}
                None => {
                    self.view_owners.insert(key, view.clone());
                }
            }

            for chart in view_charts(view) {
                if !self.charts.has(&chart.id) {
                    tracing::debug!(view = %view, chart = %chart.id, "adding view chart");
                    self.charts.add(chart)?;
                }
            }

            let qtypes = view_qtypes_chart(view);
            let qtypes_id = qtypes.id.clone();
            self.ensure_dims(
                &qtypes_id,
                || qtypes,
                resolver.qtypes.keys().map(|qt| view_qtype_dim(view, qt)),
            )?;

            for (name, value) in resolver.stats.iter().chain(resolver.cachestats.iter()) {
                mx.insert(format!("{view}_{name}"), *value);
            }
            for (qt, value) in &resolver.qtypes {
                mx.insert(format!("{view}_qtype_{qt}"), *value);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Collector for BindCollector {
    fn name(&self) -> &str {
        "bind"
    }

    fn configure(&mut self, config: &serde_json::Value) -> Result<(), CollectorError> {
        // keys missing from the bag keep their defaults, including the url
        let mut merged = serde_json::to_value(BindConfig::default())
            .map_err(|e| CollectorError::Internal(format!("encode default config: {e}")))?;
        if let (Some(base), Some(bag)) = (merged.as_object_mut(), config.as_object()) {
            for (key, value) in bag {
                base.insert(key.clone(), value.clone());
            }
        }
        self.config = decode_config(&merged)?;
        Ok(())
    }

    async fn init(&mut self, ctx: &Context) -> Result<(), CollectorError> {
        self.validate_config()?;
        let permit_view = self.init_permit_view_matcher()?;
        let client = ApiClient::new(&self.config.request)?;

        let mut charts = ChartSet::new();
        charts.add_all(base_charts())?;

        tracing::debug!(
            job = %ctx.job(),
            url = %self.config.request.url,
            dialect = ?client.dialect(),
            permit_view = %self.config.permit_view,
            "bind collector initialized"
        );
        self.charts = charts;
        self.permit_view = permit_view;
        self.client = Some(client);
        self.view_owners.clear();
        self.skipped_views.clear();
        Ok(())
    }

    async fn collect(&mut self, ctx: &Context) -> Result<Samples, CollectorError> {
        ctx.check()?;
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CollectorError::Internal("collect called before init".to_string()))?;

        let stats = ctx.run(client.server_stats()).await??;

        let mut mx = Samples::new();
        self.collect_server(&stats, &mut mx)?;
        self.collect_views(&stats, &mut mx)?;
        Ok(mx)
    }

    fn charts(&self) -> &ChartSet {
        &self.charts
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.request.timeout_duration().ok()
    }

    fn cleanup(&mut self) {
        self.client = None;
    }
}
