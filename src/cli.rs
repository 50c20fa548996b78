use crate::{
    config::Config,
    http::HttpApi,
    orchestrator::{Orchestrator, Phase, SessionView},
    poller::{JobPoller, JobUpdate, PollEvent, PollOutcome},
    report::{FileVerdict, StatusReport, SubmissionReport},
    session::Session,
    transport::JobStatusSource,
    util::{ensure_dir, load_upload, now_rfc3339},
};
use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "doc-verify")]
#[command(about = "Submit documents for server-side verification and follow the job")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./doc-verify.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Doctor {},
    /// Upload files and follow the verification job to completion.
    Submit {
        files: Vec<PathBuf>,
        /// Write the JSON report here as well.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Fetch a job's status once.
    Status { job_id: String },
    /// Poll an existing job until it finishes.
    Watch { job_id: String },
    Login {
        #[arg(long)]
        email: String,
        /// Environment variable holding the password.
        #[arg(long, default_value = "DOC_VERIFY_PASSWORD")]
        password_env: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, default_value = "DOC_VERIFY_PASSWORD")]
        password_env: String,
    },
    Logout {},
    Whoami {},
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
}

pub async fn dispatch(args: Args) -> Result<()> {
    let cfg = load_config(args.config.as_deref())?;
    let _guard = init_logging(&args, &cfg)?;

    let session = Arc::new(Session::init(&cfg.auth)?);
    let api = HttpApi::new(&cfg.api, Arc::clone(&session))?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg, &api).await,
        Command::Submit { files, report } => submit(&cfg, api, files, report.as_deref()).await,
        Command::Status { job_id } => status(&api, job_id).await,
        Command::Watch { job_id } => watch_job(&cfg, api, job_id).await,
        Command::Login {
            email,
            password_env,
        } => {
            let password = read_password(password_env)?;
            let data = api
                .login(email, &password)
                .await
                .with_context(|| "login failed")?;
            store_token(&session, data.token.clone())?;
            print_json(&serde_json::json!({ "user": data.user, "authenticated": true }))
        }
        Command::Register {
            name,
            email,
            password_env,
        } => {
            let password = read_password(password_env)?;
            let data = api
                .register(name, email, &password)
                .await
                .with_context(|| "registration failed")?;
            store_token(&session, data.token.clone())?;
            print_json(&serde_json::json!({ "user": data.user, "authenticated": true }))
        }
        Command::Logout {} => {
            session.teardown()?;
            info!("logged out");
            Ok(())
        }
        Command::Whoami {} => {
            if !session.is_authenticated() {
                bail!("not logged in");
            }
            match api.profile().await {
                Ok(data) => print_json(&serde_json::json!({ "user": data.user })),
                Err(err) => {
                    // A rejected token is dropped so the next run starts clean.
                    if matches!(err.status, Some(401) | Some(403)) {
                        warn!("stored token was rejected; clearing it");
                        session.teardown()?;
                    }
                    Err(anyhow!(err).context("loading profile"))
                }
            }
        }
        Command::History { page, limit } => {
            let page = api
                .history((*page).max(1), (*limit).max(1))
                .await
                .with_context(|| "loading history")?;
            print_json(&page)
        }
    }
}

fn load_config(user: Option<&Path>) -> Result<Config> {
    let cfg = match resolve_config_path(user) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };
    let cfg = cfg.with_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    ["doc-verify.toml", "doc-verify.example.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the JSON reports, so logs go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = match resolve_log_path(cfg) {
        Some(path) => {
            let parent = path.parent().unwrap_or_else(|| Path::new("."));
            if !parent.as_os_str().is_empty() {
                ensure_dir(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file: {}", path.display()))?;
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from("doc-verify.log"))
}

async fn doctor(cfg: &Config, api: &HttpApi) -> Result<()> {
    let reachable = match api.ping().await {
        Ok(code) => serde_json::json!({ "ok": true, "status": code }),
        Err(err) => serde_json::json!({ "ok": false, "error": err.to_string() }),
    };
    print_json(&serde_json::json!({
        "base_url": cfg.api.base_url,
        "upload_path": cfg.api.upload_path,
        "status_path": cfg.api.status_path,
        "poll_interval_ms": cfg.polling.interval_ms,
        "fetch_timeout_ms": cfg.polling.fetch_timeout_ms,
        "authenticated": api.session().is_authenticated(),
        "server": reachable,
    }))
}

async fn submit(
    cfg: &Config,
    api: HttpApi,
    inputs: &[PathBuf],
    report_override: Option<&Path>,
) -> Result<()> {
    validate_inputs(cfg, inputs)?;

    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        files.push(load_upload(input).await?);
    }

    let api = Arc::new(api);
    let orchestrator = Orchestrator::new(api.clone(), api, cfg.poll_settings());
    let logger = tokio::spawn(log_transitions(orchestrator.subscribe()));
    let started = now_rfc3339();

    let run = async {
        match orchestrator.submit(files).await {
            Ok(Some(receipt)) => debug!(job_id = %receipt.job_id, "tracking job"),
            Ok(None) => info!("no files given; nothing to submit"),
            // Already recorded in the view.
            Err(err) => debug!("submit returned: {err}"),
        }
        orchestrator.wait_settled().await
    };

    let mut interrupted = false;
    let view = tokio::select! {
        view = run => view,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; abandoning the job");
            interrupted = true;
            orchestrator.reset();
            orchestrator.view()
        }
    };
    logger.abort();

    let report = SubmissionReport::from_view(&view, started, now_rfc3339());
    let report_path = report_override
        .map(Path::to_path_buf)
        .or_else(|| (!cfg.output.report_path.is_empty()).then(|| PathBuf::from(&cfg.output.report_path)));
    if let Some(path) = report_path {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing report: {}", path.display()))?;
        info!("report written to {}", path.display());
    }
    if cfg.output.print_summary {
        print_json(&report)?;
    }

    if interrupted {
        bail!("interrupted");
    }
    match view.phase {
        Phase::Errored => Err(anyhow!(
            view.error.unwrap_or_else(|| "verification failed".to_string())
        )),
        _ => Ok(()),
    }
}

async fn log_transitions(mut rx: watch::Receiver<SessionView>) {
    let mut last_phase = Phase::Idle;
    let mut last_percent = None;
    while rx.changed().await.is_ok() {
        let view = rx.borrow_and_update().clone();
        if view.phase != last_phase {
            info!(phase = ?view.phase, job_id = view.job_id.as_deref().unwrap_or("-"), "phase");
            last_phase = view.phase;
        }
        match view.phase {
            Phase::Uploading => {
                for (file, pct) in &view.byte_progress {
                    debug!(file = %file, pct, "upload progress");
                }
            }
            Phase::Processing | Phase::Done => {
                if last_percent != Some(view.processing_percent) {
                    info!(percent = view.processing_percent, "processing");
                    last_percent = Some(view.processing_percent);
                }
            }
            Phase::Idle | Phase::Errored => {}
        }
    }
}

async fn status(api: &HttpApi, job_id: &str) -> Result<()> {
    let job = api
        .fetch_status(job_id)
        .await
        .with_context(|| format!("fetching status for job {job_id}"))?;
    print_json(&StatusReport::from_snapshot(&job))
}

async fn watch_job(cfg: &Config, api: HttpApi, job_id: &str) -> Result<()> {
    let last: Arc<Mutex<Option<JobUpdate>>> = Arc::new(Mutex::new(None));
    let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let sink = {
        let last = Arc::clone(&last);
        let failure = Arc::clone(&failure);
        Arc::new(move |event: PollEvent| match event {
            PollEvent::Snapshot(update) => {
                info!(status = ?update.status, percent = update.percent, "job update");
                *last.lock() = Some(update);
            }
            PollEvent::Failed(err) => {
                *failure.lock() = Some(err.user_message());
            }
        })
    };

    let handle = JobPoller::start(Arc::new(api), job_id, cfg.poll_settings(), sink);
    let outcome = tokio::select! {
        outcome = handle.join() => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; stopping the poll cycle");
            PollOutcome::Cancelled
        }
    };

    let last = last.lock().clone();
    let failure = failure.lock().clone();
    let error = failure.or_else(|| last.as_ref().and_then(|u| u.error.clone()));
    print_json(&serde_json::json!({
        "job_id": job_id,
        "outcome": format!("{outcome:?}").to_ascii_lowercase(),
        "status": last.as_ref().map(|u| u.status),
        "processing_percent": last.as_ref().map(|u| u.percent).unwrap_or(0),
        "error": error,
        "files": last
            .as_ref()
            .and_then(|u| u.results.as_ref())
            .map(|r| r.iter().map(FileVerdict::from_result).collect::<Vec<_>>())
            .unwrap_or_default(),
    }))?;

    match outcome {
        PollOutcome::Completed => Ok(()),
        PollOutcome::Cancelled => bail!("interrupted"),
        PollOutcome::Failed | PollOutcome::Errored => {
            Err(anyhow!(error.unwrap_or_else(|| "job failed".to_string())))
        }
    }
}

/// File-selection rules: the core assumes everything it receives passed these.
fn validate_inputs(cfg: &Config, inputs: &[PathBuf]) -> Result<()> {
    if inputs.len() > cfg.limits.max_files {
        bail!(
            "too many files: {} (at most {} per batch)",
            inputs.len(),
            cfg.limits.max_files
        );
    }

    let mut names = HashSet::new();
    for input in inputs {
        let input_str = input.display().to_string();
        if looks_like_url(&input_str) {
            bail!("URL inputs are not supported: {input_str}");
        }

        let meta = std::fs::metadata(input)
            .with_context(|| format!("input does not exist: {}", input.display()))?;
        if !meta.is_file() {
            bail!("input is not a file: {}", input.display());
        }
        if meta.len() > cfg.limits.max_file_bytes {
            bail!(
                "input exceeds max_file_bytes ({} > {}): {}",
                meta.len(),
                cfg.limits.max_file_bytes,
                input.display()
            );
        }

        // Upload progress is tracked per file name.
        let name = input.file_name().map(|n| n.to_string_lossy().into_owned());
        if let Some(name) = name {
            if !names.insert(name.clone()) {
                bail!("two inputs share the file name {name}: {}", input.display());
            }
        }

        let ext = input
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();
        if !cfg
            .limits
            .allowed_extensions
            .iter()
            .any(|a| a.eq_ignore_ascii_case(&ext))
        {
            bail!(
                "unsupported file type (allowed: {}): {}",
                cfg.limits.allowed_extensions.join(", "),
                input.display()
            );
        }
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn read_password(var: &str) -> Result<String> {
    let password =
        std::env::var(var).with_context(|| format!("password variable {var} is not set"))?;
    if password.is_empty() {
        bail!("password variable {var} is empty");
    }
    Ok(password)
}

fn store_token(session: &Session, token: Option<String>) -> Result<()> {
    match token.filter(|t| !t.is_empty()) {
        Some(token) => session.set_token(Some(token)),
        None => bail!("server response carried no token"),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
