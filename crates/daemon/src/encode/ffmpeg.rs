//! ffmpeg encoder
//!
//! Builds an ffmpeg invocation from a [`Profile`] and runs it with
//! `-progress pipe:1`, turning the key=value progress stream into percentages.

use super::{EncodeError, EncodeRequest, Encoder};
use crate::profile::{Codec, Profile};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Map a ProRes tier name to the `prores_ks` profile index.
///
/// Unknown names fall back to `standard`.
pub fn prores_profile_index(preset: &str) -> &'static str {
    match preset.to_lowercase().as_str() {
        "proxy" => "0",
        "lt" => "1",
        "standard" => "2",
        "hq" => "3",
        _ => "2",
    }
}

/// Build the ffmpeg command for one transcode.
pub fn build_ffmpeg_command(program: &Path, profile: &Profile, input: &Path, output: &Path) -> Command {
    let mut cmd = Command::new(program);

    cmd.args(["-hide_banner", "-nostdin", "-y", "-loglevel", "error"]);
    cmd.arg("-i").arg(input);

    match profile.codec {
        Codec::ProRes => {
            cmd.args(["-c:v", "prores_ks"]);
            cmd.arg("-profile:v").arg(prores_profile_index(&profile.preset));
        }
        Codec::H264 | Codec::H265 => {
            let encoder = if profile.codec == Codec::H264 { "libx264" } else { "libx265" };
            cmd.args(["-c:v", encoder]);
            cmd.arg("-preset").arg(&profile.preset);
            if let Some(bitrate) = &profile.max_bitrate {
                cmd.arg("-b:v").arg(bitrate);
                cmd.arg("-maxrate").arg(bitrate);
            }
        }
    }

    if let Some(pix_fmt) = &profile.pixel_format {
        cmd.arg("-pix_fmt").arg(pix_fmt);
    }
    if let Some(rate) = profile.frame_rate {
        cmd.arg("-r").arg(rate.to_string());
    }
    if let Some(scale) = &profile.scale {
        cmd.arg("-vf").arg(format!("scale={}", scale));
    }

    cmd.arg("-c:a").arg(&profile.audio_codec);
    if profile.audio_bitrate != "0" {
        cmd.arg("-b:a").arg(&profile.audio_bitrate);
    }

    cmd.args(["-progress", "pipe:1", "-nostats"]);
    cmd.arg(output);

    cmd
}

/// Accumulates ffmpeg `-progress` key=value lines.
#[derive(Debug, Default, Clone)]
pub struct ProgressParser {
    pub out_time_us: u64,
    pub speed: Option<f64>,
    pub is_complete: bool,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a single line of ffmpeg progress output
    pub fn parse_line(&mut self, line: &str) {
        let Some((key, value)) = line.split_once('=') else {
            return;
        };
        let value = value.trim();
        match key.trim() {
            // out_time_ms is microseconds too, despite the name
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<u64>() {
                    self.out_time_us = us;
                }
            }
            "speed" => {
                if let Ok(s) = value.trim_end_matches('x').parse::<f64>() {
                    self.speed = Some(s);
                }
            }
            "progress" => {
                if value == "end" {
                    self.is_complete = true;
                }
            }
            _ => {}
        }
    }

    pub fn out_time_s(&self) -> f64 {
        self.out_time_us as f64 / 1_000_000.0
    }

    /// Percent complete given the input duration, if it can be known.
    pub fn percent(&self, duration_s: Option<f64>) -> Option<f32> {
        if self.is_complete {
            return Some(100.0);
        }
        let duration = duration_s.filter(|d| *d > 0.0)?;
        Some(((self.out_time_s() / duration) * 100.0).clamp(0.0, 100.0) as f32)
    }
}

/// Encoder backed by the ffmpeg and ffprobe binaries.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg
    }

    /// Container duration in seconds via ffprobe. `None` when it cannot be determined.
    pub async fn media_duration(&self, input: &Path) -> Option<f64> {
        let output = tokio::process::Command::new(&self.ffprobe)
            .args(["-v", "error", "-show_entries", "format=duration"])
            .args(["-of", "default=noprint_wrappers=1:nokey=1"])
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                parse_duration(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                debug!(input = %input.display(), code = ?out.status.code(), "ffprobe failed");
                None
            }
            Err(e) => {
                debug!("ffprobe unavailable: {}", e);
                None
            }
        }
    }
}

fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .lines()
        .find_map(|line| line.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

async fn remove_partial(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!(output = %output.display(), "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(output = %output.display(), "Failed to remove partial output: {}", e),
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    async fn encode(
        &self,
        request: &EncodeRequest,
        progress: mpsc::UnboundedSender<f32>,
        cancel: CancellationToken,
    ) -> Result<(), EncodeError> {
        let duration = tokio::select! {
            _ = cancel.cancelled() => return Err(EncodeError::Cancelled),
            duration = self.media_duration(&request.input) => duration,
        };

        let mut cmd = tokio::process::Command::from(build_ffmpeg_command(
            &self.ffmpeg,
            &request.profile,
            &request.input,
            &request.output,
        ));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            job_id = %request.job_id,
            profile = %request.profile.name,
            input = %request.input.display(),
            output = %request.output.display(),
            "Starting ffmpeg"
        );

        let mut child = cmd.spawn().map_err(|source| EncodeError::Spawn {
            program: self.ffmpeg.display().to_string(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("ffmpeg stderr not captured"))?;

        // ffmpeg echoes file names as raw bytes, so decode lossily
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = BufReader::new(stderr).read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).into_owned()
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::new();
        let mut stdout_open = true;

        let status = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        warn!(job_id = %request.job_id, "Failed to kill ffmpeg: {}", e);
                    }
                    stderr_task.abort();
                    remove_partial(&request.output).await;
                    return Err(EncodeError::Cancelled);
                }
                status = child.wait(), if !stdout_open => break status?,
                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => {
                        parser.parse_line(&line);
                        if let Some(pct) = parser.percent(duration) {
                            let _ = progress.send(pct);
                        }
                    }
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        debug!("Progress stream error: {}", e);
                        stdout_open = false;
                    }
                },
            }
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if !status.success() {
            remove_partial(&request.output).await;
            return Err(EncodeError::Failed {
                code: status.code(),
                stderr: stderr_text.trim().to_string(),
            });
        }

        let produced = tokio::fs::metadata(&request.output)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if !produced {
            return Err(EncodeError::MissingOutput(request.output.clone()));
        }

        let _ = progress.send(100.0);
        Ok(())
    }
}
