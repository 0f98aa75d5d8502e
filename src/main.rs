use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use folder_slideshow::config::Configuration;
use folder_slideshow::decode::ImageDecoder;
use folder_slideshow::events::{FolderChanged, PlaybackCommand, ViewerEvent};
use folder_slideshow::tasks;
use folder_slideshow::transition::TransitionSelection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "slideshow",
    version,
    about = "Slideshow that keeps up with changing folders"
)]
struct Args {
    /// Path to YAML config
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Folder to show; repeat for several (replaces the configured list)
    #[arg(short = 'f', long = "folder", value_name = "DIR")]
    folders: Vec<PathBuf>,
    /// Seconds each image stays on screen
    #[arg(short, long, value_name = "SECONDS")]
    duration: Option<f64>,
    /// Display index to present on
    #[arg(short, long, value_name = "INDEX")]
    monitor: Option<usize>,
    /// Transition between images (none, fade, slide-left, ..., slide-random, blinds)
    #[arg(short, long, value_name = "NAME")]
    transition: Option<String>,
    /// Shuffle each folder once at startup
    #[arg(short, long)]
    shuffle: bool,
    /// Quiet period before a changed folder is re-read (e.g. 500ms)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    debounce: Option<Duration>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn configuration(&self) -> Result<Configuration> {
        let mut cfg = match &self.config {
            Some(path) => Configuration::from_yaml_file(path)
                .with_context(|| format!("failed to load configuration from {}", path.display()))?,
            None => Configuration::default(),
        };
        if !self.folders.is_empty() {
            cfg.folders = self.folders.clone();
        }
        if let Some(secs) = self.duration {
            cfg.duration = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid --duration {secs}"))?;
        }
        if self.monitor.is_some() {
            cfg.monitor = self.monitor;
        }
        if let Some(name) = &self.transition {
            cfg.transition = TransitionSelection::parse_lenient(name);
        }
        if self.shuffle {
            cfg.shuffle = true;
        }
        if let Some(debounce) = self.debounce {
            cfg.debounce = debounce;
            cfg.debounce_tick = cfg.debounce_tick.min(debounce);
        }
        cfg.validated().context("invalid configuration values")
    }
}

fn init_tracing(verbosity: u8) {
    // RUST_LOG wins; otherwise -v raises the crate's level
    let fallback = match verbosity {
        0 => "info",
        1 => "info,folder_slideshow=debug",
        _ => "info,folder_slideshow=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let cfg = args.configuration()?;
    tracing::info!("configuration:\n{:#?}", cfg);

    // Channels (small/bounded)
    let (folder_tx, folder_rx) = mpsc::channel::<FolderChanged>(64); // Files -> Manager
    let (command_tx, command_rx) = mpsc::channel::<PlaybackCommand>(16); // Control -> Manager
    let (viewer_tx, viewer_rx) = mpsc::channel::<ViewerEvent>(16); // Manager -> Viewer

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    // Files
    tasks.spawn({
        let cfg = cfg.clone();
        let cancel = cancel.clone();
        async move {
            tasks::files::run(cfg, folder_tx, cancel)
                .await
                .context("files task failed")
        }
    });

    // Manager
    tasks.spawn({
        let cfg = cfg.clone();
        let cancel = cancel.clone();
        async move {
            tasks::manager::run(
                cfg,
                Arc::new(ImageDecoder),
                folder_rx,
                command_rx,
                viewer_tx,
                cancel,
            )
            .await
            .context("manager task failed")
        }
    });

    // Viewer
    tasks.spawn({
        let monitor = cfg.monitor;
        let cancel = cancel.clone();
        async move {
            tasks::viewer::run(viewer_rx, monitor, cancel)
                .await
                .context("viewer task failed")
        }
    });

    // Control
    tasks.spawn({
        let cancel = cancel.clone();
        async move {
            tasks::control::run(command_tx, cancel)
                .await
                .context("control task failed")
        }
    });

    // The first task to finish takes the rest down with it
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("task error: {e:?}"),
            Err(e) => tracing::error!("join error: {e}"),
        }
        cancel.cancel();
    }

    Ok(())
}
