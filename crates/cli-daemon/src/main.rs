//! CLI entry point for bulletproof
//!
//! Parses command line arguments and runs the watch-folder monitor, or
//! inspects its persisted state.

use anyhow::{bail, Context, Result};
use bulletproof::{
    create_status_router, format_queue_report, init_logging, run_startup_checks,
    run_status_server, FfmpegEncoder, MonitorConfig, MonitorHandle, MonitorLoop, ProfileCatalog,
    QueueSnapshot,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// bulletproof - watch-folder video transcoding service
#[derive(Parser, Debug)]
#[command(name = "bulletproof")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch a folder and transcode files as they arrive
    Run {
        /// Path to the configuration file (YAML, JSON or TOML)
        #[arg(short, long, default_value = "bulletproof.yaml")]
        config: PathBuf,

        /// Skip startup checks (ffmpeg, output directory). For testing only.
        #[arg(long, default_value = "false")]
        skip_checks: bool,

        /// ffmpeg binary
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: PathBuf,

        /// ffprobe binary, used for progress reporting
        #[arg(long, default_value = "ffprobe")]
        ffprobe: PathBuf,
    },

    /// Print the persisted queue
    Status {
        /// Configuration file whose persist_path holds the queue
        #[arg(short, long, conflicts_with = "queue")]
        config: Option<PathBuf>,

        /// Queue file to read directly
        #[arg(short, long)]
        queue: Option<PathBuf>,

        /// Number of finished jobs to show
        #[arg(long, default_value_t = 10)]
        history: usize,
    },

    /// List the built-in encoding profiles
    Profiles,

    /// Write an example configuration file
    InitConfig {
        /// Destination (.yaml, .yml, .json or .toml)
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long, default_value = "false")]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run {
            config,
            skip_checks,
            ffmpeg,
            ffprobe,
        } => run(&config, skip_checks, ffmpeg, ffprobe).await,
        Command::Status {
            config,
            queue,
            history,
        } => status(config.as_deref(), queue.as_deref(), history),
        Command::Profiles => {
            profiles();
            Ok(())
        }
        Command::InitConfig { path, force } => init_config(&path, force),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config_path: &Path, skip_checks: bool, ffmpeg: PathBuf, ffprobe: PathBuf) -> Result<()> {
    let config = MonitorConfig::load(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    init_logging(config.log_directive(), config.log_file.as_deref())?;
    info!(config = %config_path.display(), "bulletproof starting");

    if skip_checks {
        warn!("Skipping startup checks (--skip-checks enabled)");
    } else {
        run_startup_checks(&config, &ffmpeg)?;
    }

    let encoder = FfmpegEncoder::new(ffmpeg, ffprobe);
    let mut monitor = MonitorLoop::from_config(&config, encoder)?;
    let handle = monitor.handle();

    let server = config.status_address.clone().map(|addr| {
        let router = create_status_router(handle.clone(), monitor.rules().rules().to_vec());
        let cancel = handle.cancellation_token();
        tokio::spawn(async move {
            if let Err(e) = run_status_server(&addr, router, cancel).await {
                error!(address = %addr, "Status server failed: {}", e);
            }
        })
    });

    tokio::spawn(wait_for_shutdown(handle));

    monitor.run().await;

    if let Some(server) = server {
        let _ = server.await;
    }
    Ok(())
}

async fn wait_for_shutdown(handle: MonitorHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
                    _ = term.recv() => info!("SIGTERM received, shutting down"),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, shutting down");
                }
            }
        }
    }

    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Interrupt received, shutting down");
    }

    handle.stop();
}

fn status(config: Option<&Path>, queue: Option<&Path>, history: usize) -> Result<()> {
    let queue_path = match (config, queue) {
        (_, Some(queue)) => queue.to_path_buf(),
        (Some(config_path), None) => {
            let mut config = MonitorConfig::load_from_file(config_path)
                .with_context(|| format!("Failed to load config {}", config_path.display()))?;
            config.apply_env_overrides();
            match config.persist_path {
                Some(path) => path,
                None => bail!("{} has no persist_path; nothing to report", config_path.display()),
            }
        }
        (None, None) => bail!("Pass --config or --queue"),
    };

    let snapshot = QueueSnapshot::load(&queue_path)?;
    print!("{}", format_queue_report(&snapshot, history));
    Ok(())
}

fn profiles() {
    let catalog = ProfileCatalog::builtin();
    for profile in catalog.list() {
        println!(
            "{:<18} {:<6} .{:<4} {:<10} q{:<4} {}",
            profile.name,
            profile.codec.to_string(),
            profile.output_extension,
            profile.preset,
            profile.quality,
            profile.description
        );
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    MonitorConfig::example()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote example configuration to {}", path.display());
    Ok(())
}
