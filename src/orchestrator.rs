use crate::error::VerifyError;
use crate::model::{AnalysisResult, FileUpload, JobStatus, UploadReceipt};
use crate::poller::{JobPoller, JobUpdate, PollEvent, PollHandle, PollSettings, PollSink};
use crate::progress::ratio_percent;
use crate::transport::{JobStatusSource, ProgressFn, UploadTransport};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where the current session sits. Derived from state, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Uploading,
    Processing,
    Done,
    Errored,
}

impl Phase {
    /// True when nothing is in flight.
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Idle | Phase::Done | Phase::Errored)
    }
}

/// Read-only state handed to the presentation layer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub byte_progress: BTreeMap<String, u8>,
    pub processing_percent: u8,
    pub results: Vec<AnalysisResult>,
    pub error: Option<String>,
    pub job_id: Option<String>,
    pub status: Option<JobStatus>,
}

#[derive(Default)]
struct State {
    /// Bumped on every submit and reset; callbacks tagged with an older
    /// value are dropped.
    cycle: u64,
    uploading: bool,
    byte_progress: BTreeMap<String, u8>,
    job_id: Option<String>,
    poll: Option<PollHandle>,
    status: Option<JobStatus>,
    processing_percent: u8,
    results: Vec<AnalysisResult>,
    error: Option<String>,
}

impl State {
    fn phase(&self) -> Phase {
        if self.error.is_some() || self.status == Some(JobStatus::Failed) {
            Phase::Errored
        } else if self.uploading {
            Phase::Uploading
        } else if self.job_id.is_some() {
            if self.status == Some(JobStatus::Completed) {
                Phase::Done
            } else {
                Phase::Processing
            }
        } else {
            Phase::Idle
        }
    }

    fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase(),
            byte_progress: self.byte_progress.clone(),
            processing_percent: self.processing_percent,
            results: self.results.clone(),
            error: self.error.clone(),
            job_id: self.job_id.clone(),
            status: self.status,
        }
    }

    fn clear(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
        self.cycle += 1;
        self.uploading = false;
        self.byte_progress.clear();
        self.job_id = None;
        self.status = None;
        self.processing_percent = 0;
        self.results.clear();
        self.error = None;
    }

    fn apply(&mut self, update: JobUpdate) {
        self.status = Some(update.status);
        self.processing_percent = update.percent;
        if let Some(results) = update.results {
            self.results = results;
        }
        // `error` on a non-terminal snapshot is informational only.
        if update.status == JobStatus::Failed {
            let err = VerifyError::job_failed(&update.job_id, update.error.as_deref());
            self.error = Some(err.user_message());
        }
    }
}

type Listener = Arc<dyn Fn(&SessionView) + Send + Sync>;

struct Shared {
    state: Mutex<State>,
    tx: watch::Sender<SessionView>,
    listeners: Mutex<Vec<Listener>>,
}

impl Shared {
    /// Called with the state lock held so observers see changes in order.
    fn publish(&self, state: &State) {
        let view = state.view();
        for listener in self.listeners.lock().iter() {
            listener(&view);
        }
        self.tx.send_replace(view);
    }
}

/// Sequences upload and polling for one job at a time and merges both into a
/// single [`SessionView`].
pub struct Orchestrator {
    transport: Arc<dyn UploadTransport>,
    source: Arc<dyn JobStatusSource>,
    settings: PollSettings,
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn UploadTransport>,
        source: Arc<dyn JobStatusSource>,
        settings: PollSettings,
    ) -> Self {
        let (tx, _rx) = watch::channel(SessionView::default());
        Self {
            transport,
            source,
            settings,
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                tx,
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn view(&self) -> SessionView {
        self.shared.state.lock().view()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionView> {
        self.shared.tx.subscribe()
    }

    /// Calls `f` with every published view, in order, without coalescing.
    ///
    /// `f` runs while the orchestrator's state is locked and must not call
    /// back into it.
    pub fn observe(&self, f: impl Fn(&SessionView) + Send + Sync + 'static) {
        self.shared.listeners.lock().push(Arc::new(f));
    }

    /// True while a poll cycle is still running.
    pub fn is_polling(&self) -> bool {
        self.shared
            .state
            .lock()
            .poll
            .as_ref()
            .is_some_and(|p| !p.is_finished())
    }

    /// Uploads `files` and starts tracking the job the server creates.
    ///
    /// Byte progress is keyed by [`FileUpload::name`], so names within one
    /// batch should be distinct; the CLI rejects batches that repeat one.
    ///
    /// An empty batch is a no-op and returns `Ok(None)`. A job that is still
    /// being tracked is reset first. Returns [`VerifyError::Cancelled`] when a
    /// reset or a newer submit lands while the upload is in flight; the late
    /// result is discarded.
    pub async fn submit(
        &self,
        files: Vec<FileUpload>,
    ) -> Result<Option<UploadReceipt>, VerifyError> {
        if files.is_empty() {
            debug!("submit called with no files; ignoring");
            return Ok(None);
        }

        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        let cycle = {
            let mut state = self.shared.state.lock();
            if state.uploading || state.poll.is_some() {
                info!(
                    job_id = state.job_id.as_deref().unwrap_or("-"),
                    "new submit supersedes the active cycle"
                );
            }
            state.clear();
            state.uploading = true;
            for name in &names {
                state.byte_progress.insert(name.clone(), 0);
            }
            self.shared.publish(&state);
            state.cycle
        };

        info!(files = names.len(), cycle, "upload started");
        let on_progress = self.progress_callback(cycle, names.clone());
        let outcome = self.transport.upload(&files, Some(on_progress)).await;

        let mut state = self.shared.state.lock();
        if state.cycle != cycle {
            debug!(cycle, "upload finished after reset; result ignored");
            return Err(VerifyError::Cancelled);
        }

        match outcome {
            Ok(receipt) => {
                // Byte phase must be seen complete before processing starts.
                for name in &names {
                    state.byte_progress.insert(name.clone(), 100);
                }
                self.shared.publish(&state);

                state.uploading = false;
                state.byte_progress.clear();
                if receipt.job_id.is_empty() {
                    warn!("upload response carried no job id; nothing to track");
                    self.shared.publish(&state);
                    return Ok(Some(receipt));
                }

                info!(
                    job_id = %receipt.job_id,
                    file_count = receipt.file_count,
                    "upload accepted"
                );
                state.job_id = Some(receipt.job_id.clone());
                state.status = Some(JobStatus::Pending);
                state.poll = Some(JobPoller::start(
                    Arc::clone(&self.source),
                    receipt.job_id.clone(),
                    self.settings,
                    self.poll_sink(cycle),
                ));
                self.shared.publish(&state);
                Ok(Some(receipt))
            }
            Err(err) => {
                let err = VerifyError::upload(err);
                warn!("{err}");
                state.uploading = false;
                state.error = Some(err.user_message());
                self.shared.publish(&state);
                Err(err)
            }
        }
    }

    /// Stops any poll cycle and returns to `idle`. Safe to call at any phase.
    pub fn reset(&self) {
        let mut state = self.shared.state.lock();
        if let Some(job_id) = &state.job_id {
            debug!(job_id = %job_id, "reset");
        }
        state.clear();
        self.shared.publish(&state);
    }

    /// Resolves with the first settled view (`idle`, `done` or `errored`).
    pub async fn wait_settled(&self) -> SessionView {
        let mut rx = self.subscribe();
        loop {
            let view = rx.borrow_and_update().clone();
            if view.phase.is_settled() {
                return view;
            }
            if rx.changed().await.is_err() {
                return self.view();
            }
        }
    }

    fn progress_callback(&self, cycle: u64, names: Vec<String>) -> ProgressFn {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |sent, total| {
            if total == 0 {
                return;
            }
            let pct = ratio_percent(sent.min(total), total);
            let mut state = shared.state.lock();
            if state.cycle != cycle || !state.uploading {
                return;
            }
            let mut changed = false;
            for name in &names {
                let entry = state.byte_progress.entry(name.clone()).or_insert(0);
                if pct > *entry {
                    *entry = pct;
                    changed = true;
                }
            }
            if changed {
                shared.publish(&state);
            }
        })
    }

    fn poll_sink(&self, cycle: u64) -> PollSink {
        let shared = Arc::clone(&self.shared);
        Arc::new(move |event| {
            let mut state = shared.state.lock();
            if state.cycle != cycle {
                debug!(cycle, "stale poll event dropped");
                return;
            }
            match event {
                PollEvent::Snapshot(update) => state.apply(update),
                PollEvent::Failed(err) => state.error = Some(err.user_message()),
            }
            shared.publish(&state);
        })
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        // The poll sink holds `shared`, so the cycle must be stopped here.
        self.shared.state.lock().clear();
    }
}
