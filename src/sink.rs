//! Output sinks.
//!
//! A job hands each tick's records to a [`Sink`] in three steps: it stages
//! chart announcements, obsoletions and samples, then calls
//! [`Sink::flush`]. Only a successful flush hands the staged records
//! downstream, so one job's tick lands as a whole or not at all.
//!
//! # Components
//!
//! - [`wire::WireSink`]: writes the line protocol from a dedicated writer
//!   thread fed by a bounded channel.
//! - [`memory::MemorySink`]: keeps committed records in memory for tests.

pub mod memory;
pub mod wire;

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::Instant;

use crate::chart::Chart;

/// Errors returned by sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The downstream channel did not accept the tick before its deadline.
    #[error("sink is full")]
    Full,

    /// The sink has been shut down.
    #[error("sink is closed")]
    Closed,

    /// Writer setup failed.
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One staged or committed sink record.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Chart definition with its dimensions, labels and variables.
    Announce {
        chart: Chart,
        update_every: Duration,
    },
    /// End of life of a chart.
    Obsolete { chart_id: String },
    /// One tick of values for a chart, in dimension order.
    Sample {
        chart_id: String,
        at: DateTime<Utc>,
        values: Vec<(String, i64)>,
    },
}

/// Downstream consumer of charts and samples.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    /// Stage a chart definition for `job`.
    async fn announce(&self, job: &str, chart: &Chart, update_every: Duration)
    -> Result<(), SinkError>;

    /// Stage the end of life of a chart.
    async fn obsolete(&self, job: &str, chart_id: &str) -> Result<(), SinkError>;

    /// Stage one tick of values for a chart.
    async fn sample(
        &self,
        job: &str,
        chart_id: &str,
        at: DateTime<Utc>,
        values: Vec<(String, i64)>,
    ) -> Result<(), SinkError>;

    /// Hand every staged record of `job` downstream.
    ///
    /// Gives up with [`SinkError::Full`] at `deadline`; the staged records
    /// are dropped in that case.
    async fn flush(&self, job: &str, deadline: Option<Instant>) -> Result<(), SinkError>;

    /// Drop the staged records of `job`.
    async fn discard(&self, job: &str);
}

/// Per-job staging area shared by the bundled sinks.
#[derive(Debug, Default)]
pub(crate) struct Staging {
    pending: std::collections::HashMap<String, Vec<Record>>,
}

impl Staging {
    pub(crate) fn push(&mut self, job: &str, record: Record) {
        self.pending.entry(job.to_string()).or_default().push(record);
    }

    pub(crate) fn take(&mut self, job: &str) -> Vec<Record> {
        self.pending.remove(job).unwrap_or_default()
    }
}
