use crate::model::FileUpload;
use anyhow::{Context, Result};
use std::path::Path;
use time::format_description::well_known::Rfc3339;

pub fn ensure_dir(p: &Path) -> Result<()> {
    std::fs::create_dir_all(p).with_context(|| format!("create_dir_all {}", p.display()))
}

pub fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Reads a file into memory as an upload part named after its file name.
pub async fn load_upload(path: &Path) -> Result<FileUpload> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Ok(FileUpload::new(name, mime.essence_str(), data))
}

/// Strips scheme, host and query so URLs are safe to log.
pub fn path_for_logs(url: &url::Url) -> &str {
    url.path()
}
