use crate::model::{AnalysisResult, JobSnapshot, JobStatus, Verdict};
use crate::orchestrator::{Phase, SessionView};
use crate::progress;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReport {
    pub job_id: Option<String>,
    pub started: String,
    pub finished: String,
    pub phase: Phase,
    pub status: Option<JobStatus>,
    pub processing_percent: u8,
    pub error: Option<String>,
    pub files: Vec<FileVerdict>,
}

impl SubmissionReport {
    pub fn from_view(view: &SessionView, started: String, finished: String) -> Self {
        Self {
            job_id: view.job_id.clone(),
            started,
            finished,
            phase: view.phase,
            status: view.status,
            processing_percent: view.processing_percent,
            error: view.error.clone(),
            files: view.results.iter().map(FileVerdict::from_result).collect(),
        }
    }
}

/// Flattened view of one [`AnalysisResult`] for printing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileVerdict {
    pub file: Option<String>,
    pub verdict: Verdict,
    pub label: String,
    pub confidence: Option<f64>,
    pub authentic: Option<bool>,
    pub summary: Option<String>,
}

impl FileVerdict {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let verdict = result.verdict();
        let analysis = result.analysis.as_ref();
        Self {
            file: result.file_name().map(str::to_string),
            label: verdict.label().to_string(),
            verdict,
            confidence: analysis.and_then(|a| a.confidence),
            authentic: analysis.and_then(|a| a.is_authentic),
            summary: analysis.and_then(|a| a.summary.clone()),
        }
    }
}

/// One-shot status lookup, as printed by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub processing_percent: u8,
    pub error: Option<String>,
    pub files: Vec<FileVerdict>,
}

impl StatusReport {
    pub fn from_snapshot(job: &JobSnapshot) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            processing_percent: progress::normalize(job, 0),
            error: job.error.clone(),
            files: job
                .results
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(FileVerdict::from_result)
                .collect(),
        }
    }
}
