//! Encoder abstraction and the ffmpeg implementation.

pub mod ffmpeg;

use crate::profile::Profile;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use ffmpeg::{build_ffmpeg_command, prores_profile_index, FfmpegEncoder, ProgressParser};

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder binary could not be started
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Encoder exited unsuccessfully
    #[error("ffmpeg exited with {}: {stderr}", describe_exit(.code))]
    Failed { code: Option<i32>, stderr: String },

    /// Encoder reported success but produced nothing
    #[error("Output file missing or empty: {}", .0.display())]
    MissingOutput(PathBuf),

    /// Encode was interrupted by cancellation
    #[error("Encode cancelled")]
    Cancelled,

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "signal".to_string(),
    }
}

/// Everything an encoder needs to run one job.
#[derive(Debug, Clone)]
pub struct EncodeRequest {
    pub job_id: String,
    pub input: PathBuf,
    pub output: PathBuf,
    pub profile: Profile,
}

/// Runs one transcode to completion.
///
/// Implementations send progress percentages (0-100) on `progress` as they go
/// and must stop promptly when `cancel` fires, removing any partial output
/// and returning [`EncodeError::Cancelled`].
#[async_trait]
pub trait Encoder: Send + Sync {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: mpsc::UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError>;
}
