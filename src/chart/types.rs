//! Chart, dimension, label and variable records.

use std::collections::HashSet;

use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Errors raised by chart construction and validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    /// Chart ID is empty.
    #[error("chart id is empty")]
    EmptyId,

    /// Chart title is empty.
    #[error("chart '{0}': title is empty")]
    EmptyTitle(String),

    /// Chart has no dimensions.
    #[error("chart '{0}': no dimensions")]
    NoDims(String),

    /// Two dimensions share an ID.
    #[error("chart '{chart}': duplicate dimension '{dim}'")]
    DuplicateDim { chart: String, dim: String },

    /// Dimension divisor is zero.
    #[error("chart '{chart}': dimension '{dim}' has zero divisor")]
    ZeroDivisor { chart: String, dim: String },

    /// A label has an empty key.
    #[error("chart '{0}': label with empty key")]
    EmptyLabelKey(String),

    /// Context is not dotted lowercase.
    #[error("chart '{chart}': invalid context '{context}'")]
    InvalidContext { chart: String, context: String },

    /// Chart type string is not recognised.
    #[error("unknown chart type '{0}'")]
    UnknownType(String),

    /// Chart already present in the set.
    #[error("chart '{0}' already exists")]
    Duplicate(String),

    /// Dimension not present on the chart.
    #[error("chart '{chart}': dimension '{dim}' not found")]
    DimNotFound { chart: String, dim: String },
}

/// Chart rendering type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ChartType {
    #[default]
    Line,
    Area,
    Stacked,
    Pie,
    Bars,
    Gauge,
    Scatter,
    Heatmap,
    Table,
}

impl ChartType {
    /// Parse a chart type, mapping failures to [`ChartError::UnknownType`].
    pub fn parse(s: &str) -> Result<Self, ChartError> {
        s.parse()
            .map_err(|_| ChartError::UnknownType(s.to_string()))
    }
}

/// Dimension algorithm applied by the downstream agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DimAlgo {
    #[default]
    Absolute,
    Incremental,
    #[strum(serialize = "percentage-of-absolute-row")]
    PercentOfAbsoluteRow,
    #[strum(serialize = "percentage-of-incremental-row")]
    PercentOfIncrementalRow,
}

/// Where a label value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LabelSource {
    /// Set by the collector itself.
    #[default]
    Auto,
    /// Set from user configuration.
    Conf,
    /// Set by a Kubernetes-aware discoverer.
    K8s,
}

impl LabelSource {
    /// Numeric wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Auto => 1,
            Self::Conf => 2,
            Self::K8s => 4,
        }
    }
}

/// A chart label identifying the monitored target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub key: String,
    pub value: String,
    pub source: LabelSource,
}

impl Label {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            source: LabelSource::Auto,
        }
    }
}

/// A named chart-level scalar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub id: String,
    pub value: i64,
}

/// Chart flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChartOpts {
    pub hidden: bool,
    pub detail: bool,
    pub obsolete: bool,
    pub store_first: bool,
}

impl ChartOpts {
    /// Space-separated option words, as sent on the wire.
    pub fn render(&self) -> String {
        let mut words = Vec::new();
        if self.hidden {
            words.push("hidden");
        }
        if self.detail {
            words.push("detail");
        }
        if self.obsolete {
            words.push("obsolete");
        }
        if self.store_first {
            words.push("store_first");
        }
        words.join(" ")
    }
}

/// Dimension flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DimOpts {
    pub hidden: bool,
    pub obsolete: bool,
}

impl DimOpts {
    pub fn render(&self) -> String {
        match (self.hidden, self.obsolete) {
            (true, true) => "hidden obsolete".to_string(),
            (true, false) => "hidden".to_string(),
            (false, true) => "obsolete".to_string(),
            (false, false) => String::new(),
        }
    }
}

/// One time-series line within a chart.
///
/// A reported sample `v` is rendered by the agent as `v * mul / div`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dim {
    pub id: String,
    pub name: String,
    pub algo: DimAlgo,
    pub mul: i64,
    pub div: i64,
    pub opts: DimOpts,
}

impl Dim {
    /// Create an absolute dimension whose display name equals its ID.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            algo: DimAlgo::Absolute,
            mul: 1,
            div: 1,
            opts: DimOpts::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_algo(mut self, algo: DimAlgo) -> Self {
        self.algo = algo;
        self
    }

    /// Shorthand for [`DimAlgo::Incremental`].
    pub fn incremental(self) -> Self {
        self.with_algo(DimAlgo::Incremental)
    }

    pub fn with_mul(mut self, mul: i64) -> Self {
        self.mul = mul;
        self
    }

    pub fn with_div(mut self, div: i64) -> Self {
        self.div = div;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.opts.hidden = true;
        self
    }

    /// Value the agent displays for a raw sample.
    pub fn render(&self, value: i64) -> f64 {
        value as f64 * self.mul as f64 / self.div as f64
    }
}

/// A named time-series group emitted by a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub id: String,
    pub title: String,
    pub units: String,
    pub family: String,
    pub context: String,
    pub chart_type: ChartType,
    pub priority: u32,
    pub labels: Vec<Label>,
    pub dims: Vec<Dim>,
    pub vars: Vec<Var>,
    pub opts: ChartOpts,
}

impl Chart {
    /// Create a line chart with no dimensions.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        units: impl Into<String>,
        family: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            units: units.into(),
            family: family.into(),
            context: context.into(),
            chart_type: ChartType::Line,
            priority: 0,
            labels: Vec::new(),
            dims: Vec::new(),
            vars: Vec::new(),
            opts: ChartOpts::default(),
        }
    }

    pub fn with_type(mut self, chart_type: ChartType) -> Self {
        self.chart_type = chart_type;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(Label::new(key, value));
        self
    }

    pub fn with_dim(mut self, dim: Dim) -> Self {
        self.dims.push(dim);
        self
    }

    pub fn with_var(mut self, id: impl Into<String>, value: i64) -> Self {
        self.vars.push(Var {
            id: id.into(),
            value,
        });
        self
    }

    pub fn with_opts(mut self, opts: ChartOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn has_dim(&self, id: &str) -> bool {
        self.dims.iter().any(|d| d.id == id)
    }

    pub fn get_dim(&self, id: &str) -> Option<&Dim> {
        self.dims.iter().find(|d| d.id == id)
    }

    /// Append a dimension, rejecting duplicates.
    pub fn add_dim(&mut self, dim: Dim) -> Result<(), ChartError> {
        if self.has_dim(&dim.id) {
            return Err(ChartError::DuplicateDim {
                chart: self.id.clone(),
                dim: dim.id,
            });
        }
        self.dims.push(dim);
        Ok(())
    }

    /// Remove a dimension by ID.
    pub fn remove_dim(&mut self, id: &str) -> Result<Dim, ChartError> {
        let pos = self
            .dims
            .iter()
            .position(|d| d.id == id)
            .ok_or_else(|| ChartError::DimNotFound {
                chart: self.id.clone(),
                dim: id.to_string(),
            })?;
        Ok(self.dims.remove(pos))
    }

    /// Check structural invariants.
    ///
    /// # Errors
    /// Fails on empty ID or title, no dimensions, duplicate dimension IDs,
    /// a zero divisor, an empty label key, or a context that is not dotted
    /// lowercase.
    pub fn validate(&self) -> Result<(), ChartError> {
        if self.id.is_empty() {
            return Err(ChartError::EmptyId);
        }
        if self.title.is_empty() {
            return Err(ChartError::EmptyTitle(self.id.clone()));
        }
        if self.dims.is_empty() {
            return Err(ChartError::NoDims(self.id.clone()));
        }

        let mut seen = HashSet::with_capacity(self.dims.len());
        for dim in &self.dims {
            if !seen.insert(dim.id.as_str()) {
                return Err(ChartError::DuplicateDim {
                    chart: self.id.clone(),
                    dim: dim.id.clone(),
                });
            }
            if dim.div == 0 {
                return Err(ChartError::ZeroDivisor {
                    chart: self.id.clone(),
                    dim: dim.id.clone(),
                });
            }
        }

        if self.labels.iter().any(|l| l.key.is_empty()) {
            return Err(ChartError::EmptyLabelKey(self.id.clone()));
        }

        if !is_dotted_lowercase(&self.context) {
            return Err(ChartError::InvalidContext {
                chart: self.id.clone(),
                context: self.context.clone(),
            });
        }

        Ok(())
    }
}

fn is_dotted_lowercase(context: &str) -> bool {
    let mut parts = 0;
    for part in context.split('.') {
        if part.is_empty()
            || !part
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return false;
        }
        parts += 1;
    }
    parts >= 2
}
