use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use doc_verify::config::Api;
use doc_verify::error::VerifyError;
use doc_verify::http::HttpApi;
use doc_verify::model::{FileUpload, JobStatus};
use doc_verify::orchestrator::{Orchestrator, Phase};
use doc_verify::poller::PollSettings;
use doc_verify::session::Session;
use doc_verify::transport::{JobStatusSource, ProgressFn, UploadTransport};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TOKEN: &str = "tok-123";

#[derive(Default)]
struct Server {
    /// (field name, file name, byte count) for every uploaded part.
    parts: Mutex<Vec<(String, String, usize)>>,
    status_calls: AtomicUsize,
}

async fn verify_multiple(
    State(server): State<Arc<Server>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut count = 0;
    while let Some(field) = multipart.next_field().await.expect("field") {
        let name = field.name().unwrap_or_default().to_string();
        let file = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.expect("bytes");
        if name == "documents" {
            count += 1;
        }
        server.parts.lock().push((name, file, bytes.len()));
    }
    Json(json!({ "jobId": "J9", "fileCount": count }))
}

async fn reject() -> impl IntoResponse {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({ "message": "file too large" })),
    )
}

async fn job_status(
    State(server): State<Arc<Server>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"));
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "message": "Unauthorized" })),
        );
    }

    let call = server.status_calls.fetch_add(1, Ordering::SeqCst);
    let job = if call == 0 {
        json!({ "id": job_id, "status": "processing", "processedFiles": 1, "totalFiles": 2 })
    } else {
        json!({
            "id": job_id,
            "status": "completed",
            "processedFiles": 2,
            "totalFiles": 2,
            "results": [
                {
                    "file": { "originalname": "a.pdf", "mimetype": "application/pdf", "size": 1024 },
                    "analysis": { "status": "valid", "confidence": 0.97, "isAuthentic": true }
                },
                { "analysis": { "status": "suspicious" } }
            ]
        })
    };
    (StatusCode::OK, Json(json!({ "job": job })))
}

async fn spawn_server() -> (Api, Arc<Server>) {
    let server = Arc::new(Server::default());
    let app = Router::new()
        .route("/api/documents/verify-multiple", post(verify_multiple))
        .route("/reject", post(reject))
        .route("/api/documents/jobs/:job_id", get(job_status))
        .with_state(Arc::clone(&server));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let api = Api {
        base_url: format!("http://{addr}"),
        request_timeout_seconds: 10,
        ..Api::default()
    };
    (api, server)
}

fn files() -> Vec<FileUpload> {
    vec![
        FileUpload::new("a.pdf", "application/pdf", vec![1u8; 1024]),
        FileUpload::new("b.jpg", "image/jpeg", vec![2u8; 200 * 1024]),
    ]
}

#[tokio::test]
async fn multipart_upload_reports_progress_and_decodes_receipt() {
    let (api, server) = spawn_server().await;
    let client = HttpApi::new(&api, Arc::new(Session::anonymous())).expect("client");

    let ticks: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let on_progress: ProgressFn = {
        let ticks = Arc::clone(&ticks);
        Arc::new(move |sent, total| ticks.lock().push((sent, total)))
    };

    let receipt = client
        .upload(&files(), Some(on_progress))
        .await
        .expect("upload");
    assert_eq!(receipt.job_id, "J9");
    assert_eq!(receipt.file_count, 2);

    let parts = server.parts.lock().clone();
    assert_eq!(
        parts,
        vec![
            ("documents".to_string(), "a.pdf".to_string(), 1024),
            ("documents".to_string(), "b.jpg".to_string(), 200 * 1024),
        ]
    );

    let ticks = ticks.lock();
    let total = (1024 + 200 * 1024) as u64;
    assert!(ticks.len() > 2, "large file should be streamed in chunks");
    assert!(ticks.windows(2).all(|w| w[0].0 <= w[1].0));
    assert!(ticks.iter().all(|(_, t)| *t == total));
    assert_eq!(ticks.last(), Some(&(total, total)));
}

#[tokio::test]
async fn error_body_message_becomes_upload_error() {
    let (mut api, _server) = spawn_server().await;
    api.upload_path = "/reject".into();
    let client = HttpApi::new(&api, Arc::new(Session::anonymous())).expect("client");

    let err = client.upload(&files(), None).await.unwrap_err();
    assert_eq!(err.status, Some(413));
    assert_eq!(err.server_message(), Some("file too large"));
    assert_eq!(VerifyError::upload(err).user_message(), "file too large");
}

#[tokio::test]
async fn status_fetch_sends_bearer_token() {
    let (api, _server) = spawn_server().await;

    let anonymous = HttpApi::new(&api, Arc::new(Session::anonymous())).expect("client");
    let err = anonymous.fetch_status("J9").await.unwrap_err();
    assert_eq!(err.status, Some(401));

    let client = HttpApi::new(&api, Arc::new(Session::with_token(TOKEN))).expect("client");
    let job = client.fetch_status("J9").await.expect("status");
    assert_eq!(job.id, "J9");
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.processed_files, Some(1));
    assert_eq!(job.total_files, Some(2));
}

#[tokio::test]
async fn orchestrator_runs_end_to_end_over_http() {
    let (api, server) = spawn_server().await;
    let client = Arc::new(HttpApi::new(&api, Arc::new(Session::with_token(TOKEN))).expect("client"));
    let settings = PollSettings {
        interval: Duration::from_millis(20),
        fetch_timeout: Some(Duration::from_secs(5)),
    };
    let orch = Orchestrator::new(client.clone(), client, settings);

    orch.submit(files()).await.expect("submit");
    let view = tokio::time::timeout(Duration::from_secs(10), orch.wait_settled())
        .await
        .expect("settled in time");

    assert_eq!(view.phase, Phase::Done);
    assert_eq!(view.job_id.as_deref(), Some("J9"));
    assert_eq!(view.processing_percent, 100);
    assert_eq!(view.results.len(), 2);
    assert_eq!(view.results[0].file_name(), Some("a.pdf"));
    assert_eq!(server.status_calls.load(Ordering::SeqCst), 2);
}
