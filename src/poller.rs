use crate::error::VerifyError;
use crate::model::{AnalysisResult, JobSnapshot, JobStatus};
use crate::progress;
use crate::transport::JobStatusSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Pause between the end of one fetch and the start of the next.
    pub interval: Duration,
    /// Upper bound for a single status fetch. `None` waits forever.
    pub fetch_timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            fetch_timeout: Some(DEFAULT_FETCH_TIMEOUT),
        }
    }
}

/// What one successful fetch contributes to the caller's state.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobStatus,
    pub percent: u8,
    pub results: Option<Vec<AnalysisResult>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum PollEvent {
    Snapshot(JobUpdate),
    Failed(VerifyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Server reported `completed`.
    Completed,
    /// Server reported `failed`.
    Failed,
    /// A status fetch failed or timed out.
    Errored,
    Cancelled,
}

pub type PollSink = Arc<dyn Fn(PollEvent) + Send + Sync>;

/// Owns one running poll cycle.
///
/// Cancelling or dropping the handle disarms the cycle immediately: the task
/// is aborted and no event is delivered to the sink afterwards.
pub struct PollHandle {
    job_id: String,
    token: CancellationToken,
    task: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn cancel(&self) {
        if !self.token.is_cancelled() {
            debug!(job_id = %self.job_id, "poll cycle cancelled");
        }
        self.token.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    pub async fn join(mut self) -> PollOutcome {
        match self.task.take() {
            Some(task) => match task.await {
                Ok(outcome) => outcome,
                Err(err) if err.is_cancelled() => PollOutcome::Cancelled,
                Err(err) => {
                    warn!(job_id = %self.job_id, "poll task panicked: {err}");
                    PollOutcome::Errored
                }
            },
            None => PollOutcome::Cancelled,
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

pub struct JobPoller;

impl JobPoller {
    /// Starts a fresh poll cycle for `job_id`.
    ///
    /// The first fetch is issued right away; later fetches follow
    /// `settings.interval` after the previous one completes. The cycle ends on
    /// a terminal status, on the first failed fetch, or on cancellation.
    /// Must be called from within a tokio runtime.
    pub fn start(
        source: Arc<dyn JobStatusSource>,
        job_id: impl Into<String>,
        settings: PollSettings,
        sink: PollSink,
    ) -> PollHandle {
        let job_id = job_id.into();
        let token = CancellationToken::new();
        let task = tokio::spawn(run_cycle(
            source,
            job_id.clone(),
            settings,
            token.clone(),
            sink,
        ));
        PollHandle {
            job_id,
            token,
            task: Some(task),
        }
    }
}

async fn run_cycle(
    source: Arc<dyn JobStatusSource>,
    job_id: String,
    settings: PollSettings,
    token: CancellationToken,
    sink: PollSink,
) -> PollOutcome {
    info!(
        job_id = %job_id,
        interval_ms = settings.interval.as_millis() as u64,
        "polling started"
    );

    let mut percent = 0u8;
    let mut fetches = 0u32;

    loop {
        fetches += 1;
        let fetched = tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            res = fetch_once(source.as_ref(), &job_id, settings.fetch_timeout) => res,
        };

        // Cancellation may land between completion and publication.
        if token.is_cancelled() {
            return PollOutcome::Cancelled;
        }

        match fetched {
            Ok(job) => {
                percent = progress::normalize(&job, percent);
                let status = job.status;
                debug!(job_id = %job_id, fetch = fetches, ?status, percent, "job snapshot");

                sink(PollEvent::Snapshot(JobUpdate {
                    job_id: job_id.clone(),
                    status,
                    percent,
                    results: job.results,
                    error: job.error,
                }));

                match status {
                    JobStatus::Completed => {
                        info!(job_id = %job_id, fetches, "job completed");
                        return PollOutcome::Completed;
                    }
                    JobStatus::Failed => {
                        warn!(job_id = %job_id, fetches, "job failed");
                        return PollOutcome::Failed;
                    }
                    JobStatus::Pending | JobStatus::Processing => {}
                }
            }
            Err(err) => {
                warn!(job_id = %job_id, fetches, "polling stopped: {err}");
                sink(PollEvent::Failed(err));
                return PollOutcome::Errored;
            }
        }

        tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            _ = time::sleep(settings.interval) => {}
        }
    }
}

async fn fetch_once(
    source: &dyn JobStatusSource,
    job_id: &str,
    timeout: Option<Duration>,
) -> Result<JobSnapshot, VerifyError> {
    let res = match timeout {
        Some(limit) => time::timeout(limit, source.fetch_status(job_id))
            .await
            .map_err(|_| VerifyError::polling_timeout(job_id, limit))?,
        None => source.fetch_status(job_id).await,
    };
    res.map_err(|e| VerifyError::polling(job_id, e))
}
