//! chunklift command-line uploader.

mod config;
mod resume;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chunklift_protocol::TransferState;
use chunklift_uploader::{FileHandle, HttpUploadServer, TransferEvent, UploadEngine};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use config::CliConfig;
use resume::ResumeQueue;

/// Uploads files to a chunked upload server, resuming after failures.
#[derive(Parser, Debug)]
#[command(name = "chunklift", version)]
struct Cli {
    /// Files to upload.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Path to TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upload server base URL.
    #[arg(long)]
    server: Option<String>,

    /// Chunk size in bytes.
    #[arg(long)]
    chunk_size: Option<u64>,

    /// Max simultaneous chunk requests.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Net chunk errors tolerated before a task is interrupted.
    #[arg(long)]
    retry_budget: Option<u32>,

    /// Automatic resumes per task.
    #[arg(long)]
    auto_resume: Option<u32>,
}

impl Cli {
    fn apply(&self, config: &mut CliConfig) {
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.engine.chunk_size_bytes = chunk_size;
        }
        if let Some(concurrency) = self.concurrency {
            config.engine.global_concurrency_ceiling = concurrency;
        }
        if let Some(budget) = self.retry_budget {
            config.engine.retry_budget = budget;
        }
        if let Some(auto_resume) = self.auto_resume {
            config.auto_resume = auto_resume;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server_url,
        files = cli.files.len(),
        "starting chunklift"
    );

    let server = HttpUploadServer::new(
        config.server_url.clone(),
        Duration::from_secs(config.request_timeout_secs),
    )
    .context("building HTTP client")?;
    let mut engine = UploadEngine::new(config.engine.clone(), Arc::new(server))?;

    let failures = run(&mut engine, &config, cli.files).await?;
    engine.shutdown();

    if failures > 0 {
        anyhow::bail!("{failures} upload(s) failed");
    }
    Ok(())
}

/// Drives every task to a terminal state. Returns the number of failures.
async fn run(
    engine: &mut UploadEngine,
    config: &CliConfig,
    files: Vec<PathBuf>,
) -> anyhow::Result<usize> {
    let mut events = engine
        .take_events()
        .context("event receiver already taken")?;

    let handles = files.into_iter().map(FileHandle::new).collect();
    let ids = engine.submit(handles).await?;

    let mut outstanding: HashSet<String> = ids.iter().cloned().collect();
    let mut names: HashMap<String, String> = HashMap::new();
    for snapshot in engine.snapshots().await? {
        names.insert(snapshot.task_id, snapshot.file_name);
    }
    let mut resumes: HashMap<String, u32> = HashMap::new();
    let mut due = ResumeQueue::new(Duration::from_millis(config.auto_resume_delay_ms));
    let mut failures = 0;

    while !outstanding.is_empty() {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => anyhow::bail!("engine stopped unexpectedly"),
            },
            Some(task_id) = due.next(), if !due.is_empty() => {
                if let Err(e) = engine.resume(&task_id).await {
                    let name = names.get(&task_id).map_or(task_id.as_str(), String::as_str);
                    error!(file = %name, error = %e, "resume failed");
                    outstanding.remove(&task_id);
                    failures += 1;
                }
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted, cancelling uploads");
                engine.shutdown();
                anyhow::bail!("cancelled by user");
            }
        };

        let task_id = event.task_id().to_string();
        let name = names.get(&task_id).map_or(task_id.as_str(), String::as_str);

        match event {
            TransferEvent::Progress { percent, completed, total, .. } => {
                info!(file = %name, percent, completed, total, "progress");
            }
            TransferEvent::Finished { instant, .. } => {
                info!(file = %name, instant, "upload complete");
                outstanding.remove(&task_id);
            }
            TransferEvent::Failed { error, .. } => {
                error!(file = %name, error = %error, "upload failed");
                outstanding.remove(&task_id);
                failures += 1;
            }
            TransferEvent::Interrupted { error, .. } | TransferEvent::MergeFailed { error, .. } => {
                let count = resumes.entry(task_id.clone()).or_default();
                if *count >= config.auto_resume {
                    error!(file = %name, error = %error, resumes = *count, "giving up");
                    outstanding.remove(&task_id);
                    failures += 1;
                    continue;
                }
                *count += 1;
                warn!(file = %name, error = %error, attempt = *count, "resuming");
                due.schedule(task_id);
            }
            TransferEvent::StateChanged { state, .. } => {
                if state == TransferState::Uploading {
                    info!(file = %name, "uploading");
                }
            }
            TransferEvent::Removed { .. } => {
                outstanding.remove(&task_id);
            }
        }
    }

    Ok(failures)
}
