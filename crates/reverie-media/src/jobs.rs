//! Submit + poll model for long-running remote jobs.
//!
//! Vendors differ in how they spell job states; adapters normalise into [`JobState`] and the
//! [`Poller`] drives the loop with a fixed cadence, an overall deadline and cancellation.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use reverie_core::{ReverieError, ReverieResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Created,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobState {
    pub status: JobStatus,
    /// 0.0..=1.0 when the vendor reports it.
    pub progress: Option<f32>,
    pub output_url: Option<String>,
    pub error: Option<String>,
}

impl JobState {
    pub fn pending(status: JobStatus) -> Self {
        Self {
            status,
            progress: None,
            output_url: None,
            error: None,
        }
    }

    pub fn completed(url: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            progress: Some(1.0),
            output_url: Some(url.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            progress: None,
            output_url: None,
            error: Some(error.into()),
        }
    }
}

/// Consecutive transient poll failures tolerated before giving up.
const MAX_POLL_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct Poller {
    pub interval: Duration,
    pub deadline: Duration,
}

impl Poller {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self { interval, deadline }
    }

    /// Poll until the job completes, fails, the deadline passes or `cancel` fires.
    /// Returns the output URL of the completed job.
    pub async fn wait<F, Fut, P>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut poll: F,
        mut on_progress: P,
    ) -> ReverieResult<String>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ReverieResult<JobState>>,
        P: FnMut(&JobState),
    {
        let deadline = Instant::now() + self.deadline;
        let mut failures = 0;
        loop {
            // Cancellation and the deadline also cut a poll request that hangs.
            let polled = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(target: "reverie::video", job = label, "Polling cancelled");
                    return Err(ReverieError::Cancelled);
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(self.timed_out(label));
                }
                polled = async {
                    tokio::time::sleep(self.interval).await;
                    poll().await
                } => polled,
            };

            let state = match polled {
                Ok(state) => {
                    failures = 0;
                    state
                }
                Err(err) if err.is_transient() && failures < MAX_POLL_FAILURES => {
                    failures += 1;
                    tracing::warn!(target: "reverie::video", job = label, error = %err, failures, "Poll failed");
                    continue;
                }
                Err(err) => return Err(err),
            };

            on_progress(&state);
            match state.status {
                JobStatus::Completed => {
                    return state.output_url.ok_or_else(|| {
                        ReverieError::Malformed(format!("{label} completed without an output URL"))
                    });
                }
                JobStatus::Failed => {
                    return Err(ReverieError::JobFailed(
                        state.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                JobStatus::Created | JobStatus::Processing => {
                    tracing::debug!(target: "reverie::video", job = label, progress = ?state.progress, "Still running");
                }
            }
        }
    }

    fn timed_out(&self, label: &str) -> ReverieError {
        ReverieError::Timeout(format!(
            "{label} did not finish within {}s",
            self.deadline.as_secs()
        ))
    }
}
