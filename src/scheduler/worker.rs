//! Worker tasks.
//!
//! Workers share one work queue. A work item carries the job itself, so a
//! job is owned by at most one worker at a time and its ticks can never
//! overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::job::{Job, JobState, TickOutcome};
use crate::sink::Sink;

/// Lower bound of the init + check budget.
const MIN_ADMISSION_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub(crate) enum Work {
    /// Init and check a new or retrying job.
    Admit { job: Job, token: CancellationToken },
    /// Collect once.
    Tick {
        job: Job,
        token: CancellationToken,
        deadline: Instant,
    },
    /// Obsolete charts and clean up.
    Stop { job: Job },
}

#[derive(Debug)]
pub(crate) enum Done {
    Admitted { job: Job, state: JobState },
    Ticked { job: Job, outcome: TickOutcome },
    Stopped { job: Job },
}

pub(crate) type WorkQueue = Arc<Mutex<mpsc::UnboundedReceiver<Work>>>;

pub(crate) async fn run(
    id: usize,
    queue: WorkQueue,
    done: mpsc::UnboundedSender<Done>,
    sink: Arc<dyn Sink>,
) {
    tracing::debug!(worker = id, "worker started");
    loop {
        let item = {
            let mut rx = queue.lock().await;
            rx.recv().await
        };
        let Some(item) = item else { break };

        let result = match item {
            Work::Admit { mut job, token } => {
                let deadline = Instant::now() + job.update_every().max(MIN_ADMISSION_BUDGET);
                let ctx = job.context(token, deadline);
                let state = job.admit(&ctx).await;
                Done::Admitted { job, state }
            }
            Work::Tick {
                mut job,
                token,
                deadline,
            } => {
                let ctx = job.context(token.clone(), deadline);
                let result = tokio::time::timeout_at(deadline, job.tick(&ctx, sink.as_ref())).await;
                let outcome = match result {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        token.cancel();
                        job.record_timeout(sink.as_ref()).await
                    }
                };
                Done::Ticked { job, outcome }
            }
            Work::Stop { mut job } => {
                job.stop(sink.as_ref()).await;
                Done::Stopped { job }
            }
        };

        if done.send(result).is_err() {
            break;
        }
    }
    tracing::debug!(worker = id, "worker stopped");
}
