use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::job::{Job, JobState, JobStats};

/// Snapshot of one job, as exposed by the scheduler handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInfo {
    pub module: String,
    pub name: String,
    /// Sink identity.
    pub full_name: String,
    pub state: JobState,
    #[serde(with = "humantime_serde")]
    pub update_every: Duration,
    pub stats: JobStats,
}

impl JobInfo {
    pub(crate) fn from_job(job: &Job) -> Self {
        Self {
            module: job.spec().module.clone(),
            name: job.spec().name.clone(),
            full_name: job.name().to_string(),
            state: job.state(),
            update_every: job.update_every(),
            stats: job.stats().clone(),
        }
    }
}

/// Plain-text table of job summaries, one row per job.
pub fn summary_table(jobs: &[JobInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<24} {:<10} {:>8} {:>8} {:>8}  LAST ERROR",
        "MODULE", "JOB", "STATE", "TICKS", "FAILS", "DROPPED"
    );
    for job in jobs {
        let _ = writeln!(
            out,
            "{:<16} {:<24} {:<10} {:>8} {:>8} {:>8}  {}",
            job.module,
            job.name,
            job.state,
            job.stats.ticks,
            job.stats.failures,
            job.stats.dropped_ticks,
            job.stats.last_error.as_deref().unwrap_or("-"),
        );
    }
    out
}
