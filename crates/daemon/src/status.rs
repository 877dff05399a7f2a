//! Read-only status projection of the monitor.
//!
//! The monitor loop publishes a fresh [`StatusSnapshot`] after every
//! iteration; HTTP handlers and the CLI only ever see copies.

use crate::jobs::{Job, JobStatus};
use crate::queue::{JobCounts, QueueSnapshot};
use crate::watcher::FileCounts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Jobs shown in `recent_history`.
pub const RECENT_HISTORY_LEN: usize = 10;

/// Jobs retained for `/history` and job lookups.
pub const HISTORY_WINDOW: usize = 100;

/// Lifecycle of the monitor service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Idle,
    Running,
    Paused,
    Stopping,
    Stopped,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Idle => write!(f, "idle"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Paused => write!(f, "paused"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Stopped => write!(f, "stopped"),
        }
    }
}

/// The job being encoded right now
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentJob {
    pub id: String,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub profile_name: String,
    pub progress: f32,
    pub started_at: Option<DateTime<Utc>>,
}

impl From<&Job> for CurrentJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            input_file: job.input_file.clone(),
            output_file: job.output_file.clone(),
            profile_name: job.profile_name.clone(),
            progress: job.progress,
            started_at: job.started_at,
        }
    }
}

/// Complete status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatusSnapshot {
    pub state: ServiceState,
    pub running: bool,
    pub paused: bool,
    pub watch_directory: PathBuf,
    pub output_directory: PathBuf,
    pub poll_interval_secs: u64,
    pub counts: JobCounts,
    pub current_job: Option<CurrentJob>,
    pub rule_count: usize,
    pub tracked_files: usize,
    pub files: FileCounts,
    pub active_jobs: Vec<Job>,
    pub recent_history: Vec<Job>,
    #[serde(skip)]
    pub history_window: Vec<Job>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Find a job among active and retained history.
    pub fn find_job(&self, id: &str) -> Option<&Job> {
        self.active_jobs
            .iter()
            .chain(self.history_window.iter().rev())
            .find(|j| j.id == id)
    }

    /// Most recent `limit` finished jobs, oldest first.
    pub fn history(&self, limit: usize) -> &[Job] {
        let start = self.history_window.len().saturating_sub(limit);
        &self.history_window[start..]
    }
}

/// Shared status for concurrent readers
pub type SharedStatus = Arc<RwLock<StatusSnapshot>>;

pub fn new_shared_status() -> SharedStatus {
    Arc::new(RwLock::new(StatusSnapshot::default()))
}

/// Text report of a persisted queue, as printed by the `status` command.
pub fn format_queue_report(snapshot: &QueueSnapshot, history_limit: usize) -> String {
    let counts = snapshot.counts();
    let mut out = String::new();

    let _ = writeln!(out, "Queue saved at {}", snapshot.saved_at.to_rfc3339());
    let _ = writeln!(
        out,
        "Pending: {}  Processing: {}  Complete: {}  Error: {}  Cancelled: {}",
        counts.pending, counts.processing, counts.complete, counts.error, counts.cancelled
    );

    if snapshot.active.is_empty() {
        let _ = writeln!(out, "\nNo active jobs");
    } else {
        let _ = writeln!(out, "\nActive jobs:");
        for job in &snapshot.active {
            let _ = writeln!(
                out,
                "  [{}] {} -> {} ({}, priority {}){}",
                job.status,
                job.input_name(),
                job.output_file.display(),
                job.profile_name,
                job.priority,
                if job.status == JobStatus::Processing {
                    format!(" {:.0}%", job.progress)
                } else {
                    String::new()
                }
            );
        }
    }

    let start = snapshot.history.len().saturating_sub(history_limit);
    let recent = &snapshot.history[start..];
    if !recent.is_empty() {
        let _ = writeln!(out, "\nRecent history:");
        for job in recent.iter().rev() {
            let finished = job
                .completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = write!(out, "  [{}] {} ({}) {}", job.status, job.input_name(), job.profile_name, finished);
            if let Some(err) = &job.error_message {
                let _ = write!(out, ": {}", err);
            }
            out.push('\n');
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(name: &str, status: JobStatus) -> Job {
        let mut job = Job::new(format!("/in/{}", name), format!("/out/{}", name), "archival", 1);
        job.status = status;
        job.completed_at = Some(Utc::now());
        job
    }

    #[test]
    fn test_default_snapshot_serializes() {
        let json = serde_json::to_value(StatusSnapshot::default()).unwrap();

        assert_eq!(json["state"], "idle");
        assert_eq!(json["running"], false);
        assert_eq!(json["counts"]["pending"], 0);
        assert!(json["current_job"].is_null());
        assert!(json.get("history_window").is_none());
    }

    #[test]
    fn test_history_window_lookup() {
        let mut snapshot = StatusSnapshot::default();
        for i in 0..5 {
            snapshot.history_window.push(finished(&format!("{}.mov", i), JobStatus::Complete));
        }
        let target = snapshot.history_window[2].id.clone();

        assert_eq!(snapshot.history(2).len(), 2);
        assert_eq!(snapshot.history(2)[1].input_name(), "4.mov");
        assert_eq!(snapshot.history(99).len(), 5);
        assert_eq!(snapshot.find_job(&target).unwrap().input_name(), "2.mov");
        assert!(snapshot.find_job("missing").is_none());
    }

    #[test]
    fn test_queue_report() {
        let mut pending = Job::new("/in/next.mov", "/out/next.mov", "live-qlab", 100);
        pending.status = JobStatus::Pending;
        let mut failed = finished("bad.mov", JobStatus::Error);
        failed.error_message = Some("ffmpeg exited with code 1".to_string());

        let snapshot = QueueSnapshot {
            active: vec![pending],
            history: vec![finished("good.mov", JobStatus::Complete), failed],
            saved_at: Utc::now(),
        };

        let report = format_queue_report(&snapshot, 10);
        assert!(report.contains("Pending: 1"));
        assert!(report.contains("Complete: 1  Error: 1"));
        assert!(report.contains("[pending] next.mov"));
        assert!(report.contains("[error] bad.mov (archival)"));
        assert!(report.contains(": ffmpeg exited with code 1"));
        // most recent first
        assert!(report.find("bad.mov").unwrap() < report.find("good.mov").unwrap());
    }

    #[test]
    fn test_empty_queue_report() {
        let snapshot = QueueSnapshot {
            active: Vec::new(),
            history: Vec::new(),
            saved_at: Utc::now(),
        };
        let report = format_queue_report(&snapshot, 10);
        assert!(report.contains("No active jobs"));
        assert!(!report.contains("Recent history"));
    }
}
