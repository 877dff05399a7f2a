//! Startup checks for bulletproof
//!
//! Preflight checks run before the monitor starts:
//! - ffmpeg is installed and reports a parseable version
//! - the output directory exists (or can be created) and is writable

use crate::config::MonitorConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Oldest ffmpeg major version known to support every argument we pass.
pub const MIN_FFMPEG_MAJOR: u32 = 4;

const WRITE_TEST_NAME: &str = ".bulletproof-write-test";

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Encoder not available: {0}")]
    EncoderUnavailable(String),

    #[error("FFmpeg version requirement not met: {0}")]
    EncoderVersion(String),

    #[error("Output directory {} is not writable: {source}", .path.display())]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse FFmpeg version output and extract the major version number
///
/// Handles "ffmpeg version 6.1.1 ..." and git builds such as
/// "ffmpeg version n6.0-12-gabcdef ...". Snapshot builds
/// ("ffmpeg version N-112345-g...") have no release number and return `None`.
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let lower = version_line.to_lowercase();
    let token = lower.split("ffmpeg version").nth(1)?.split_whitespace().next()?;

    token
        .trim_start_matches('n')
        .split(['.', '-'])
        .next()?
        .parse()
        .ok()
}

/// Run `<program> -version` and return its first output line.
pub fn check_encoder_available(program: &Path) -> Result<String, StartupError> {
    let output = Command::new(program).arg("-version").output().map_err(|e| {
        StartupError::EncoderUnavailable(format!(
            "{} -version failed; is ffmpeg installed and in PATH? Error: {}",
            program.display(),
            e
        ))
    })?;

    if !output.status.success() {
        return Err(StartupError::EncoderUnavailable(format!(
            "{} -version exited with {}",
            program.display(),
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// Check that the reported ffmpeg version is recent enough.
///
/// Unparseable versions (snapshot builds) are accepted with a warning.
pub fn check_encoder_version(version_line: &str) -> Result<(), StartupError> {
    match parse_ffmpeg_version(version_line) {
        Some(major) if major < MIN_FFMPEG_MAJOR => Err(StartupError::EncoderVersion(format!(
            "FFmpeg {}.x or newer required, got: {}",
            MIN_FFMPEG_MAJOR, major
        ))),
        Some(_) => Ok(()),
        None => {
            warn!(version = %version_line, "Could not parse FFmpeg version, continuing");
            Ok(())
        }
    }
}

/// Create the output directory if needed and prove it is writable.
pub fn check_output_writable(dir: &Path) -> Result<(), StartupError> {
    let not_writable = |source| StartupError::OutputNotWritable {
        path: dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(not_writable)?;
    let marker = dir.join(WRITE_TEST_NAME);
    fs::write(&marker, b"ok").map_err(not_writable)?;
    fs::remove_file(&marker).map_err(not_writable)?;
    Ok(())
}

/// Run all startup checks in order
///
/// 1. Output directory writable
/// 2. Encoder available
/// 3. Encoder version
pub fn run_startup_checks(cfg: &MonitorConfig, ffmpeg: &Path) -> Result<(), StartupError> {
    check_output_writable(&cfg.output_directory)?;
    let version = check_encoder_available(ffmpeg)?;
    check_encoder_version(&version)?;
    info!(version = %version, "Startup checks passed");
    Ok(())
}
