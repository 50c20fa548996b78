use crate::error::TransportError;
use crate::model::{FileUpload, JobSnapshot, UploadReceipt};
use async_trait::async_trait;
use std::sync::Arc;

/// Byte-level upload progress: `(bytes_sent, bytes_total)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Sends a batch of files and returns the job created for them.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(
        &self,
        files: &[FileUpload],
        on_progress: Option<ProgressFn>,
    ) -> Result<UploadReceipt, TransportError>;
}

/// Reads the current state of a server-side job.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn fetch_status(&self, job_id: &str) -> Result<JobSnapshot, TransportError>;
}
