//! In-memory sink for tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

pub use super::Record;

use super::{Sink, SinkError, Staging};
use crate::chart::Chart;

/// Sink that keeps every committed record.
///
/// [`MemorySink::set_full`] makes flushes fail with [`SinkError::Full`],
/// standing in for a downstream that does not keep up.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    staging: Mutex<Staging>,
    committed: Mutex<Vec<(String, Record)>>,
    full: AtomicBool,
    dropped_ticks: AtomicU64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_full(&self, full: bool) {
        self.inner.full.store(full, Ordering::Relaxed);
    }

    pub fn dropped_ticks(&self) -> u64 {
        self.inner.dropped_ticks.load(Ordering::Relaxed)
    }

    /// Every committed `(job, record)` pair, in commit order.
    pub fn records(&self) -> Vec<(String, Record)> {
        self.inner
            .committed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Committed records of one job.
    pub fn job_records(&self, job: &str) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|(j, _)| j == job)
            .map(|(_, r)| r)
            .collect()
    }

    /// Committed samples of one chart, oldest first.
    pub fn samples(&self, job: &str, chart_id: &str) -> Vec<Vec<(String, i64)>> {
        self.job_records(job)
            .into_iter()
            .filter_map(|r| match r {
                Record::Sample {
                    chart_id: id,
                    values,
                    ..
                } if id == chart_id => Some(values),
                _ => None,
            })
            .collect()
    }

    /// IDs of the charts obsoleted for one job, in order.
    pub fn obsoleted(&self, job: &str) -> Vec<String> {
        self.job_records(job)
            .into_iter()
            .filter_map(|r| match r {
                Record::Obsolete { chart_id } => Some(chart_id),
                _ => None,
            })
            .collect()
    }

    /// Charts announced for one job, in order.
    pub fn announced(&self, job: &str) -> Vec<Chart> {
        self.job_records(job)
            .into_iter()
            .filter_map(|r| match r {
                Record::Announce { chart, .. } => Some(chart),
                _ => None,
            })
            .collect()
    }

    fn stage(&self, job: &str, record: Record) {
        self.inner
            .staging
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job, record);
    }
}

#[async_trait::async_trait]
impl Sink for MemorySink {
    async fn announce(
        &self,
        job: &str,
        chart: &Chart,
        update_every: Duration,
    ) -> Result<(), SinkError> {
        self.stage(
            job,
            Record::Announce {
                chart: chart.clone(),
                update_every,
            },
        );
        Ok(())
    }

    async fn obsolete(&self, job: &str, chart_id: &str) -> Result<(), SinkError> {
        self.stage(
            job,
            Record::Obsolete {
                chart_id: chart_id.to_string(),
            },
        );
        Ok(())
    }

    async fn sample(
        &self,
        job: &str,
        chart_id: &str,
        at: DateTime<Utc>,
        values: Vec<(String, i64)>,
    ) -> Result<(), SinkError> {
        self.stage(
            job,
            Record::Sample {
                chart_id: chart_id.to_string(),
                at,
                values,
            },
        );
        Ok(())
    }

    async fn flush(&self, job: &str, _deadline: Option<Instant>) -> Result<(), SinkError> {
        let records = self
            .inner
            .staging
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take(job);
        if records.is_empty() {
            return Ok(());
        }
        if self.inner.full.load(Ordering::Relaxed) {
            self.inner.dropped_ticks.fetch_add(1, Ordering::Relaxed);
            return Err(SinkError::Full);
        }
        let mut committed = self.inner.committed.lock().unwrap_or_else(|e| e.into_inner());
        committed.extend(records.into_iter().map(|r| (job.to_string(), r)));
        Ok(())
    }

    async fn discard(&self, job: &str) {
        self.inner
            .staging
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::Dim;

    fn chart() -> Chart {
        Chart::new("c", "Title", "units", "family", "test.c").with_dim(Dim::new("d"))
    }

    #[tokio::test]
    async fn test_records_land_only_on_flush() {
        let sink = MemorySink::new();
        sink.announce("job", &chart(), Duration::from_secs(1)).await.unwrap();
        sink.sample("job", "c", Utc::now(), vec![("d".into(), 7)]).await.unwrap();
        assert!(sink.records().is_empty());

        sink.flush("job", None).await.unwrap();
        assert_eq!(sink.announced("job").len(), 1);
        assert_eq!(sink.samples("job", "c"), vec![vec![("d".to_string(), 7)]]);
    }

    #[tokio::test]
    async fn test_full_sink_drops_tick() {
        let sink = MemorySink::new();
        sink.set_full(true);
        sink.obsolete("job", "c").await.unwrap();
        assert!(matches!(sink.flush("job", None).await, Err(SinkError::Full)));
        assert_eq!(sink.dropped_ticks(), 1);

        sink.set_full(false);
        sink.flush("job", None).await.unwrap();
        assert!(sink.records().is_empty());
    }
}
