mod cli;

use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use castcorder::capture::StreamlinkRecorder;
use castcorder::channels::{read_streamers, select_streamer};
use castcorder::config::{AppConfig, is_valid_channel};
use castcorder::controller::{Collaborators, Controller, RunOutcome, combine_outcomes};
use castcorder::interrupt::{ShutdownSignal, spawn_signal_listener};
use castcorder::logging::{self, LOG_RETENTION_DAYS};
use castcorder::panic_hook;
use castcorder::postprocess::{MkvPostProcessor, ThumbnailDownloader};
use castcorder::resolver::TwitcastingResolver;
use castcorder::session::Session;
use castcorder::validator::FileValidator;

use cli::Cli;

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config =
        AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    let _guard = logging::init_logging(&config.log_dir, cli.verbosity())?;
    panic_hook::install(&config.log_dir);
    info!(version = env!("CARGO_PKG_VERSION"), "castcorder starting");

    if let Err(e) = logging::cleanup_old_logs(&config.log_dir, LOG_RETENTION_DAYS).await {
        warn!("Failed to clean up old log files: {}", e);
    }

    let channels = pick_channels(&config)?;
    let session = Arc::new(Session::from_env().with_manual_endpoint(cli.url.clone()));
    if session.manual_endpoint.is_some() && channels.len() > 1 {
        bail!("--url can only be used with a single channel");
    }
    if session.has_login() {
        info!("TwitCasting credentials loaded");
    }

    let shutdown = ShutdownSignal::new();
    let listener = spawn_signal_listener(shutdown.clone(), config.fast_exit);

    let postprocessor = Arc::new(MkvPostProcessor::new(
        config.postprocess.clone(),
        &config.base_url,
        shutdown.fast_token(),
    ));
    let thumbnails = if config.postprocess.enabled && config.postprocess.download_thumbnail {
        Some(Arc::new(ThumbnailDownloader::new(&config.capture.user_agent)?))
    } else {
        None
    };
    let collaborators = Collaborators {
        resolver: Arc::new(TwitcastingResolver::new(&config.base_url, &config.capture)?),
        recorder: Arc::new(StreamlinkRecorder::new(
            config.capture.clone(),
            config.watchdog.clone(),
            session.clone(),
            shutdown.clone(),
        )),
        validator: Arc::new(FileValidator::new(config.validation.clone())),
        postprocessor: postprocessor.clone(),
        thumbnails,
    };

    let mut tasks = JoinSet::new();
    for channel in channels {
        let controller = Controller::new(
            channel.clone(),
            config.controller_settings(&channel),
            collaborators.clone(),
            session.clone(),
            shutdown.clone(),
        );
        tasks.spawn(async move { controller.run().await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                error!("Channel task failed: {}", e);
                outcomes.push(RunOutcome::Failed(e.to_string()));
            }
        }
    }

    let pending = postprocessor.pending();
    if pending > 0 {
        info!(count = pending, "Waiting for conversions to finish (Ctrl+C to abort them)");
    }
    postprocessor.wait().await;
    listener.abort();

    let code = combine_outcomes(&outcomes).map_or(0, RunOutcome::exit_code);
    info!(code, "castcorder exiting");
    Ok(code)
}

/// Channels from the config or command line, else one picked from the streamers file.
fn pick_channels(config: &AppConfig) -> anyhow::Result<Vec<String>> {
    if !config.channels.is_empty() {
        return Ok(config.channels.clone());
    }

    let streamers = read_streamers(&config.streamers_file)?;
    let stdin = std::io::stdin();
    let channel = select_streamer(&streamers, &mut stdin.lock(), &mut std::io::stdout())?;
    if !is_valid_channel(&channel) {
        bail!("invalid channel name {channel:?} in {}", config.streamers_file.display());
    }
    Ok(vec![channel])
}
