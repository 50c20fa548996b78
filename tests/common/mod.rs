#![allow(dead_code)]

use async_trait::async_trait;
use doc_verify::error::TransportError;
use doc_verify::model::{AnalysisResult, FileUpload, JobSnapshot, JobStatus, UploadReceipt};
use doc_verify::transport::{JobStatusSource, ProgressFn, UploadTransport};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

/// Lets spawned tasks run without moving the paused clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub fn pdf(name: &str) -> FileUpload {
    FileUpload::new(name, "application/pdf", vec![0u8; 1024])
}

pub fn receipt(job_id: &str, file_count: u32) -> UploadReceipt {
    UploadReceipt {
        job_id: job_id.into(),
        file_count,
    }
}

pub fn processing(processed: u32, total: u32) -> JobSnapshot {
    let mut job = JobSnapshot::new("", JobStatus::Processing);
    job.processed_files = Some(processed);
    job.total_files = Some(total);
    job
}

pub fn result(status: &str) -> AnalysisResult {
    serde_json::from_value(serde_json::json!({ "status": status })).expect("result")
}

pub enum Upload {
    Ok(UploadReceipt),
    Fail(TransportError),
    /// Reports half the bytes, then waits for the sender before resolving.
    Held(UploadReceipt, oneshot::Receiver<()>),
}

pub struct FakeTransport {
    script: Mutex<VecDeque<Upload>>,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new(script: Vec<Upload>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn ok(job_id: &str) -> Self {
        Self::new(vec![Upload::Ok(receipt(job_id, 1))])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn upload(
        &self,
        files: &[FileUpload],
        on_progress: Option<ProgressFn>,
    ) -> Result<UploadReceipt, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let total: u64 = files.iter().map(|f| f.len()).sum::<u64>().max(1);
        let report = |sent: u64| {
            if let Some(cb) = &on_progress {
                cb(sent, total);
            }
        };

        let step = self.script.lock().pop_front();
        match step {
            Some(Upload::Ok(receipt)) => {
                report(total / 2);
                report(total);
                Ok(receipt)
            }
            Some(Upload::Fail(err)) => {
                report(total / 2);
                Err(err)
            }
            Some(Upload::Held(receipt, gate)) => {
                report(total / 2);
                let _ = gate.await;
                report(total);
                Ok(receipt)
            }
            None => Err(TransportError::new("no scripted upload left")),
        }
    }
}

pub enum Fetch {
    Reply(JobSnapshot),
    Fail(TransportError),
    /// Resolves with whatever the test sends.
    Held(oneshot::Receiver<JobSnapshot>),
    Hang,
}

/// Status source that plays a script, then keeps answering `processing`.
pub struct FakeSource {
    script: Mutex<VecDeque<Fetch>>,
    fetched: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(script: Vec<Fetch>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetched.lock().len()
    }

    /// Job ids in the order they were fetched.
    pub fn fetched_ids(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

#[async_trait]
impl JobStatusSource for FakeSource {
    async fn fetch_status(&self, job_id: &str) -> Result<JobSnapshot, TransportError> {
        self.fetched.lock().push(job_id.to_string());
        let step = self.script.lock().pop_front();
        let mut job = match step {
            Some(Fetch::Reply(job)) => job,
            Some(Fetch::Fail(err)) => return Err(err),
            Some(Fetch::Held(rx)) => rx
                .await
                .map_err(|_| TransportError::new("held fetch abandoned"))?,
            Some(Fetch::Hang) => std::future::pending().await,
            None => JobSnapshot::new(job_id, JobStatus::Processing),
        };
        if job.id.is_empty() {
            job.id = job_id.to_string();
        }
        Ok(job)
    }
}
