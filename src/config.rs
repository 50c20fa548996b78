use crate::poller::PollSettings;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const API_URL_ENV: &str = "DOC_VERIFY_API_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub output: Output,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Applies `DOC_VERIFY_API_URL` on top of the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.base_url must not be empty");
        }
        if !self.api.status_path.contains("{job_id}") {
            bail!(
                "api.status_path must contain a {{job_id}} placeholder: {}",
                self.api.status_path
            );
        }
        if self.polling.interval_ms == 0 {
            bail!("polling.interval_ms must be greater than zero");
        }
        if self.limits.max_files == 0 {
            bail!("limits.max_files must be at least 1");
        }
        Ok(())
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            interval: Duration::from_millis(self.polling.interval_ms),
            fetch_timeout: (self.polling.fetch_timeout_ms > 0)
                .then(|| Duration::from_millis(self.polling.fetch_timeout_ms)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Api {
    pub base_url: String,
    pub upload_path: String,
    pub upload_field: String,
    pub status_path: String,
    pub auth_path: String,
    pub history_path: String,
    pub request_timeout_seconds: u64,
    pub user_agent: String,
}
impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            upload_path: "/api/documents/verify-multiple".into(),
            upload_field: "documents".into(),
            status_path: "/api/documents/jobs/{job_id}".into(),
            auth_path: "/auth".into(),
            history_path: "/documents/history".into(),
            request_timeout_seconds: 300,
            user_agent: concat!("doc-verify/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Polling {
    pub interval_ms: u64,
    /// 0 disables the per-fetch timeout.
    pub fetch_timeout_ms: u64,
}
impl Default for Polling {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            fetch_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_files: usize,
    pub max_file_bytes: u64,
    pub allowed_extensions: Vec<String>,
}
impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files: 5,
            max_file_bytes: 10 * 1024 * 1024,
            allowed_extensions: vec!["pdf".into(), "jpg".into(), "jpeg".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Auth {
    pub token_env: String,
    pub token_file: String,
}
impl Default for Auth {
    fn default() -> Self {
        Self {
            token_env: "DOC_VERIFY_TOKEN".into(),
            token_file: ".doc-verify/token".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Output {
    pub print_summary: bool,
    /// Also write the submission report here when non-empty.
    pub report_path: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            print_summary: true,
            report_path: "".into(),
        }
    }
}
