//! Line-protocol sink with a dedicated writer thread.
//!
//! Single-writer pattern: one thread owns the output stream and renders
//! every committed tick, fed by a bounded channel. A tick that does not
//! fit into the channel before its deadline is dropped and counted.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio::time::Instant;

use super::{Record, Sink, SinkError, Staging};
use crate::chart::Chart;

/// Default channel capacity, in ticks.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Commands sent to the writer thread.
#[derive(Debug)]
enum Command {
    /// All records of one job's tick.
    Tick { job: String, records: Vec<Record> },
    /// Graceful shutdown.
    Shutdown,
}

/// Renders records into the line protocol.
///
/// Tracks the last update time of every chart so `BEGIN` can carry the
/// microseconds since the previous sample.
#[derive(Debug)]
pub struct WireWriter<W> {
    out: W,
    last_update: HashMap<String, DateTime<Utc>>,
}

impl<W: Write> WireWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last_update: HashMap::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Render and write one job's tick, then flush the stream.
    pub fn write_records(&mut self, job: &str, records: &[Record]) -> io::Result<()> {
        let mut buf = String::new();
        for record in records {
            self.render(job, record, &mut buf);
        }
        self.out.write_all(buf.as_bytes())?;
        self.out.flush()
    }

    fn render(&mut self, job: &str, record: &Record, buf: &mut String) {
        match record {
            Record::Announce {
                chart,
                update_every,
            } => render_chart(job, chart, *update_every, buf),
            Record::Obsolete { chart_id } => {
                let id = full_id(job, chart_id);
                let _ = writeln!(buf, "OBSOLETE '{id}'");
                self.last_update.remove(&id);
            }
            Record::Sample {
                chart_id,
                at,
                values,
            } => {
                let id = full_id(job, chart_id);
                let micros = self
                    .last_update
                    .insert(id.clone(), *at)
                    .and_then(|prev| (*at - prev).num_microseconds())
                    .unwrap_or(0)
                    .max(0);
                let _ = writeln!(buf, "BEGIN '{id}' {micros}");
                for (dim, value) in values {
                    let _ = writeln!(buf, "SET '{}' = {value}", sanitize(dim));
                }
                buf.push_str("END\n");
            }
        }
    }
}

fn full_id(job: &str, chart_id: &str) -> String {
    sanitize(&format!("{job}.{chart_id}"))
}

/// Strip characters that would break a quoted field.
fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '\'' && *c != '"')
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn render_chart(job: &str, chart: &Chart, update_every: Duration, buf: &mut String) {
    let _ = writeln!(
        buf,
        "CHART '{}' '{}' '{}' '{}' '{}' {} {} {} '{}'",
        full_id(job, &chart.id),
        sanitize(&chart.title),
        sanitize(&chart.units),
        sanitize(&chart.family),
        sanitize(&chart.context),
        chart.chart_type,
        chart.priority,
        update_every.as_secs().max(1),
        chart.opts.render(),
    );
    for label in &chart.labels {
        let _ = writeln!(
            buf,
            "LABEL '{}' '{}' {}",
            sanitize(&label.key),
            sanitize(&label.value),
            label.source.code()
        );
    }
    if !chart.labels.is_empty() {
        buf.push_str("LABEL_COMMIT\n");
    }
    for dim in &chart.dims {
        let _ = writeln!(
            buf,
            "DIMENSION '{}' '{}' {} {} {} '{}'",
            sanitize(&dim.id),
            sanitize(&dim.name),
            dim.algo,
            dim.mul,
            dim.div,
            dim.opts.render(),
        );
    }
    for var in &chart.vars {
        let _ = writeln!(buf, "VARIABLE CHART '{}' = {}", sanitize(&var.id), var.value);
    }
}

struct WriterActor<W> {
    writer: WireWriter<W>,
    rx: mpsc::Receiver<Command>,
}

impl<W: Write> WriterActor<W> {
    fn run(&mut self) {
        tracing::debug!("wire writer started");
        while let Some(cmd) = self.rx.blocking_recv() {
            match cmd {
                Command::Tick { job, records } => {
                    if let Err(e) = self.writer.write_records(&job, &records) {
                        tracing::error!(job = %job, error = %e, "failed to write tick");
                    }
                }
                Command::Shutdown => break,
            }
        }
        tracing::debug!("wire writer stopped");
    }
}

/// Sink writing the line protocol to a stream from a writer thread.
#[derive(Clone)]
pub struct WireSink {
    tx: mpsc::Sender<Command>,
    staging: Arc<Mutex<Staging>>,
    dropped_ticks: Arc<AtomicU64>,
}

impl std::fmt::Debug for WireSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireSink")
            .field("dropped_ticks", &self.dropped_ticks())
            .finish_non_exhaustive()
    }
}

impl WireSink {
    /// Spawn the writer thread over `out`.
    pub fn spawn<W>(out: W, capacity: usize) -> Result<(Self, JoinHandle<()>), SinkError>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let mut actor = WriterActor {
            writer: WireWriter::new(out),
            rx,
        };
        let handle = thread::Builder::new()
            .name("chartd-wire".to_string())
            .spawn(move || actor.run())?;

        let sink = Self {
            tx,
            staging: Arc::new(Mutex::new(Staging::default())),
            dropped_ticks: Arc::new(AtomicU64::new(0)),
        };
        Ok((sink, handle))
    }

    /// Ticks dropped because the channel was full.
    pub fn dropped_ticks(&self) -> u64 {
        self.dropped_ticks.load(Ordering::Relaxed)
    }

    /// Ask the writer thread to stop after draining queued ticks.
    pub async fn shutdown(&self) -> Result<(), SinkError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| SinkError::Closed)
    }

    fn stage(&self, job: &str, record: Record) {
        self.staging
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job, record);
    }

    fn take(&self, job: &str) -> Vec<Record> {
        self.staging
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take(job)
    }
}

#[async_trait::async_trait]
impl Sink for WireSink {
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

    async fn flush(&self, job: &str, deadline: Option<Instant>) -> Result<(), SinkError> {
        let records = self.take(job);
        if records.is_empty() {
            return Ok(());
        }
        let cmd = Command::Tick {
            job: job.to_string(),
            records,
        };

        let Some(deadline) = deadline else {
            return self.tx.send(cmd).await.map_err(|_| SinkError::Closed);
        };
        match self
            .tx
            .send_timeout(cmd, deadline.saturating_duration_since(Instant::now()))
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.dropped_ticks.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = %job, "sink channel full, dropping tick");
                Err(SinkError::Full)
            }
            Err(SendTimeoutError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    async fn discard(&self, job: &str) {
        self.take(job);
    }
}
