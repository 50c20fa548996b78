//! reqwest-backed implementation of the upload and status collaborators,
//! plus the account and history endpoints.
//!
//! Only method, path and status code are logged; tokens, query strings and
//! file contents never reach the logs.

use crate::config::Api;
use crate::error::TransportError;
use crate::model::{
    AuthData, DataEnvelope, FileUpload, HistoryPage, JobSnapshot, StatusEnvelope, UploadReceipt,
};
use crate::session::Session;
use crate::transport::{JobStatusSource, ProgressFn, UploadTransport};
use crate::util::path_for_logs;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::AUTHORIZATION;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Size of the slices handed to the HTTP stack; each one is a progress tick.
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReceiptBody {
    Flat(UploadReceipt),
    Wrapped(DataEnvelope<UploadReceipt>),
}

#[derive(Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    api: Api,
    session: Arc<Session>,
}

impl HttpApi {
    pub fn new(api: &Api, session: Arc<Session>) -> Result<Self> {
        Url::parse(&api.base_url)
            .with_context(|| format!("invalid api.base_url: {}", api.base_url))?;

        let mut builder = reqwest::Client::builder().user_agent(api.user_agent.clone());
        if api.request_timeout_seconds > 0 {
            builder = builder.timeout(Duration::from_secs(api.request_timeout_seconds));
        }
        let http = builder.build().with_context(|| "building HTTP client")?;

        Ok(Self {
            http,
            api: api.clone(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    fn url(&self, path: &str) -> Result<Url, TransportError> {
        let raw = format!("{}{}", self.api.base_url.trim_end_matches('/'), path);
        Url::parse(&raw).map_err(|e| TransportError::new(format!("invalid request URL: {e}")))
    }

    /// Expands `api.status_path`, percent-encoding the job id as part of a
    /// single path segment.
    fn status_url(&self, job_id: &str) -> Result<Url, TransportError> {
        let path = self.api.status_path.as_str();
        let (head, tail) = path.split_once("{job_id}").unwrap_or((path, ""));
        let (dir, seg_prefix) = head.rsplit_once('/').unwrap_or(("", head));
        let (seg_suffix, rest) = tail.split_once('/').unwrap_or((tail, ""));

        let mut url = self.url(dir)?;
        url.path_segments_mut()
            .map_err(|_| TransportError::new("api.base_url cannot carry a path"))?
            .pop_if_empty()
            .push(&format!("{seg_prefix}{job_id}{seg_suffix}"))
            .extend(rest.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.http.request(method, url);
        match self.session.bearer() {
            Some(bearer) => req.header(AUTHORIZATION, bearer),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: Url,
        req: RequestBuilder,
    ) -> Result<T, TransportError> {
        let resp = req.send().await?;
        let status = resp.status().as_u16();
        debug!(%method, path = path_for_logs(&url), status, "response");

        let body = resp.bytes().await?;
        if !(200..300).contains(&status) {
            return Err(error_from_body(status, &body));
        }
        serde_json::from_slice(&body).map_err(|e| {
            TransportError::new(format!(
                "decoding response from {}: {e}",
                path_for_logs(&url)
            ))
            .with_status(status)
        })
    }

    /// Any HTTP response from the base URL counts as reachable.
    pub async fn ping(&self) -> Result<u16, TransportError> {
        let url = self.url("/")?;
        let resp = self.request(Method::GET, url).send().await?;
        Ok(resp.status().as_u16())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthData, TransportError> {
        let url = self.url(&format!("{}/login", self.api.auth_path))?;
        let req = self
            .request(Method::POST, url.clone())
            .json(&serde_json::json!({ "email": email, "password": password }));
        let env: DataEnvelope<AuthData> = self.send_json(Method::POST, url, req).await?;
        Ok(env.data)
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthData, TransportError> {
        let url = self.url(&format!("{}/register", self.api.auth_path))?;
        let req = self.request(Method::POST, url.clone()).json(&serde_json::json!({
            "name": name,
            "email": email,
            "password": password,
        }));
        let env: DataEnvelope<AuthData> = self.send_json(Method::POST, url, req).await?;
        Ok(env.data)
    }

    pub async fn profile(&self) -> Result<AuthData, TransportError> {
        let url = self.url(&format!("{}/profile", self.api.auth_path))?;
        let req = self.request(Method::GET, url.clone());
        let env: DataEnvelope<AuthData> = self.send_json(Method::GET, url, req).await?;
        Ok(env.data)
    }

    pub async fn history(&self, page: u32, limit: u32) -> Result<HistoryPage, TransportError> {
        let url = self.url(&self.api.history_path)?;
        let req = self
            .request(Method::GET, url.clone())
            .query(&[("page", page), ("limit", limit)]);
        let env: DataEnvelope<HistoryPage> = self.send_json(Method::GET, url, req).await?;
        Ok(env.data)
    }
}

#[async_trait]
impl UploadTransport for HttpApi {
    async fn upload(
        &self,
        files: &[FileUpload],
        on_progress: Option<ProgressFn>,
    ) -> Result<UploadReceipt, TransportError> {
        let url = self.url(&self.api.upload_path)?;
        let total: u64 = files.iter().map(FileUpload::len).sum();
        let sent = Arc::new(AtomicU64::new(0));

        let mut form = Form::new();
        for file in files {
            let part = counted_part(file, Arc::clone(&sent), total, on_progress.clone())?;
            form = form.part(self.api.upload_field.clone(), part);
        }

        info!(
            path = path_for_logs(&url),
            files = files.len(),
            bytes = total,
            "uploading"
        );
        let req = self.request(Method::POST, url.clone()).multipart(form);
        let body: ReceiptBody = self.send_json(Method::POST, url, req).await?;
        Ok(match body {
            ReceiptBody::Flat(receipt) => receipt,
            ReceiptBody::Wrapped(env) => env.data,
        })
    }
}

#[async_trait]
impl JobStatusSource for HttpApi {
    async fn fetch_status(&self, job_id: &str) -> Result<JobSnapshot, TransportError> {
        let url = self.status_url(job_id)?;
        let req = self.request(Method::GET, url.clone());
        let env: StatusEnvelope = self.send_json(Method::GET, url, req).await?;
        let mut job = env
            .job
            .ok_or_else(|| TransportError::new("status response carried no job"))?;
        if job.id.is_empty() {
            job.id = job_id.to_string();
        }
        Ok(job)
    }
}

/// Builds a multipart part whose body reports every chunk it hands out.
fn counted_part(
    file: &FileUpload,
    sent: Arc<AtomicU64>,
    total: u64,
    on_progress: Option<ProgressFn>,
) -> Result<Part, TransportError> {
    let data = file.data.clone();
    let len = data.len();
    let chunks = (0..len).step_by(UPLOAD_CHUNK_BYTES).map(move |start| {
        let end = (start + UPLOAD_CHUNK_BYTES).min(len);
        let chunk: Bytes = data.slice(start..end);
        let n = chunk.len() as u64;
        let so_far = sent.fetch_add(n, Ordering::Relaxed) + n;
        if let Some(cb) = &on_progress {
            cb(so_far, total);
        }
        Ok::<Bytes, std::io::Error>(chunk)
    });

    let body = Body::wrap_stream(futures_util::stream::iter(chunks));
    Part::stream_with_length(body, len as u64)
        .file_name(file.name.clone())
        .mime_str(&file.mime)
        .map_err(TransportError::from)
}

fn error_from_body(status: u16, body: &[u8]) -> TransportError {
    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty());
    match message {
        Some(msg) => TransportError::server(Some(status), msg),
        None => TransportError::new(format!("server responded {status}")).with_status(status),
    }
}
