use thiserror::Error;

/// Lowercase fragments that mark a message as unsafe to show the user.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "authorization:",
    "access_token",
    "password",
    "token=",
];

pub const UPLOAD_FALLBACK: &str = "Error uploading files";
pub const POLLING_FALLBACK: &str = "Error checking job status";
pub const JOB_FAILED_FALLBACK: &str = "Document processing failed";

fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

fn sanitize_message(msg: &str, fallback: &str) -> String {
    if msg.trim().is_empty() || contains_sensitive(msg) {
        fallback.to_string()
    } else {
        msg.to_string()
    }
}

/// Failure of one request to the verification server.
#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub message: Option<String>,
    pub detail: String,
}

impl TransportError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            status: None,
            message: None,
            detail: detail.into(),
        }
    }

    /// An error carrying the `{message}` the server sent back.
    pub fn server(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status,
            detail: match status {
                Some(code) => format!("server responded {code}: {message}"),
                None => format!("server error: {message}"),
            },
            message: Some(message),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn server_message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        // reqwest's Display includes the full URL; keep only the error kind.
        let err = err.without_url();
        Self {
            status,
            message: None,
            detail: err.to_string(),
        }
    }
}

/// Errors surfaced by the job lifecycle.
#[derive(Debug, Clone, Error)]
pub enum VerifyError {
    #[error("upload failed: {message}")]
    Upload {
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("status check for job {job_id} failed: {message}")]
    Polling {
        job_id: String,
        message: String,
        #[source]
        source: Option<TransportError>,
    },

    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl VerifyError {
    pub fn upload(err: TransportError) -> Self {
        VerifyError::Upload {
            message: err.server_message().unwrap_or(UPLOAD_FALLBACK).to_string(),
            source: Some(err),
        }
    }

    pub fn polling(job_id: &str, err: TransportError) -> Self {
        VerifyError::Polling {
            job_id: job_id.to_string(),
            message: err.server_message().unwrap_or(POLLING_FALLBACK).to_string(),
            source: Some(err),
        }
    }

    pub fn polling_timeout(job_id: &str, after: std::time::Duration) -> Self {
        VerifyError::Polling {
            job_id: job_id.to_string(),
            message: POLLING_FALLBACK.to_string(),
            source: Some(TransportError::new(format!(
                "status fetch did not complete within {after:?}"
            ))),
        }
    }

    pub fn job_failed(job_id: &str, message: Option<&str>) -> Self {
        VerifyError::JobFailed {
            job_id: job_id.to_string(),
            message: message.unwrap_or(JOB_FAILED_FALLBACK).to_string(),
        }
    }

    /// The single line shown to the user. Never leaks credentials.
    pub fn user_message(&self) -> String {
        match self {
            VerifyError::Upload { message, .. } => sanitize_message(message, UPLOAD_FALLBACK),
            VerifyError::Polling { message, .. } => sanitize_message(message, POLLING_FALLBACK),
            VerifyError::JobFailed { message, .. } => {
                sanitize_message(message, JOB_FAILED_FALLBACK)
            }
            VerifyError::Cancelled => "The operation was cancelled.".to_string(),
        }
    }
}
