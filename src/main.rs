use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, LAST_MODIFIED};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upload_queue::{
    config::Config,
    files::{DroppedFile, FileStore},
    formats::FormatRegistry,
    resume::ResumeDb,
    source::OriginResolver,
    tus::{Credentials, TusUploader},
    Scheduler, UploadQueue,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "upload-queue starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!("usage: upload-queue <path|url>...");
    }

    let config = Config::load()?;
    info!(endpoint = %config.upload_endpoint(), "Loaded configuration");

    let credentials = Credentials::new(
        std::env::var("API_TOKEN").ok(),
        std::env::var("RESOURCE_ID").ok(),
    )
    .context("API_TOKEN and RESOURCE_ID must both be set")?;

    let http = reqwest::Client::builder()
        .user_agent(concat!("upload-queue/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let registry = match config.formats_api {
        Some(ref formats_api) => Some(
            FormatRegistry::fetch(&http, formats_api)
                .await
                .context("Failed to load file-type registry")?,
        ),
        None => None,
    };

    let resume = ResumeDb::open(&config.data_dir)?;
    info!(data_dir = %config.data_dir, pending = resume.count()?, "Resume database opened");

    let store = Arc::new(FileStore::new());
    let mut queue = UploadQueue::new(Arc::clone(&store), config.constraints());
    if let Some(registry) = registry {
        // the CLI requests no processing, so no catalogue is offered
        queue = queue.with_formats(registry, Vec::new());
    }

    let mut dropped = Vec::with_capacity(args.len());
    for arg in &args {
        match describe(&http, arg).await {
            Ok(file) => dropped.push(file),
            Err(e) => tracing::error!(file = %arg, error = %e, "Skipping file"),
        }
    }

    let outcome = queue.drop_files(dropped);
    for (name, rejection) in &outcome.rejected {
        tracing::warn!(file = %name, code = rejection.code(), "{rejection}");
    }
    if outcome.accepted.is_empty() {
        bail!("No files to upload");
    }
    queue.queue_all();

    let (_credentials_tx, credentials_rx) = watch::channel(Some(credentials));
    let uploader = TusUploader::new(
        &config,
        http.clone(),
        Arc::clone(&store),
        Arc::new(OriginResolver::new(http)),
        Arc::new(resume),
    );
    let scheduler = Scheduler::new(
        Arc::clone(&store),
        Arc::new(uploader),
        credentials_rx,
        config.upload.max_concurrent_uploads,
    );

    tokio::select! {
        _ = scheduler.run_until_settled() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("Interrupted, unfinished uploads can resume on the next run");
        }
    }

    for view in queue.views() {
        info!(file = %view.name, status = %view.status, "{}", view.label);
    }
    let summary = queue.summary();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.has_errors() || !summary.is_settled() {
        bail!("{} of {} file(s) did not upload", summary.total - summary.success, summary.total);
    }
    info!("Shutdown complete");
    Ok(())
}

/// Turn a command-line argument into a dropped file.
async fn describe(http: &reqwest::Client, arg: &str) -> anyhow::Result<DroppedFile> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        let resp = http.head(arg).send().await?.error_for_status()?;
        let size = resp
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .context("Remote file has no Content-Length")?;

        let mut file = DroppedFile::from_url(arg, size);
        if let Some(last_modified) = resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        {
            file = file.with_last_modified(last_modified.with_timezone(&Utc));
        }
        return Ok(file);
    }

    DroppedFile::from_path(arg).with_context(|| format!("Cannot read {arg}"))
}
