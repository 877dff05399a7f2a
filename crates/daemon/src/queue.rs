//! Priority job queue with JSON snapshot persistence.
//!
//! Every lifecycle mutation rewrites the snapshot atomically (write to
//! `<file>.tmp`, then rename). Progress updates stay in memory. On load, jobs
//! left `processing` by a crash are reset to `pending`.

use crate::jobs::{timestamp, Job, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Error type for queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize queue: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Queue file {} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {id} is already {status}")]
    AlreadyTerminal { id: String, status: JobStatus },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// On-disk form of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    #[serde(default, alias = "queued")]
    pub active: Vec<Job>,
    #[serde(default)]
    pub history: Vec<Job>,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub saved_at: DateTime<Utc>,
}

impl QueueSnapshot {
    /// Read a snapshot without recovery or rewriting. A missing file is an empty snapshot.
    pub fn load(path: &Path) -> Result<Self, QueueError> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::empty());
        }
        serde_json::from_str(&content).map_err(|source| QueueError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    fn empty() -> Self {
        Self {
            active: Vec::new(),
            history: Vec::new(),
            saved_at: Utc::now(),
        }
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts::tally(self.active.iter().chain(self.history.iter()))
    }
}

/// Per-status job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
    pub error: usize,
    pub cancelled: usize,
}

impl JobCounts {
    fn tally<'a>(jobs: impl Iterator<Item = &'a Job>) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Complete => counts.complete += 1,
                JobStatus::Error => counts.error += 1,
                JobStatus::Cancelled => counts.cancelled += 1,
            }
        }
        counts
    }

    pub fn active(&self) -> usize {
        self.pending + self.processing
    }

    pub fn finished(&self) -> usize {
        self.complete + self.error + self.cancelled
    }
}

/// Single-writer job queue.
#[derive(Debug, Default)]
pub struct JobQueue {
    path: Option<PathBuf>,
    active: Vec<Job>,
    history: Vec<Job>,
}

impl JobQueue {
    /// Queue that never touches disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a persistent queue, recovering jobs interrupted mid-encode.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let path = path.into();
        let snapshot = QueueSnapshot::load(&path)?;

        let mut queue = Self {
            path: Some(path),
            active: Vec::new(),
            history: snapshot.history,
        };

        let mut recovered = 0;
        for mut job in snapshot.active {
            match job.status {
                JobStatus::Processing => {
                    job.status = JobStatus::Pending;
                    job.progress = 0.0;
                    recovered += 1;
                    queue.active.push(job);
                }
                JobStatus::Pending => queue.active.push(job),
                // Terminal jobs only belong in history
                _ => queue.history.push(job),
            }
        }

        if recovered > 0 {
            info!(recovered, "Reset interrupted jobs to pending");
            queue.save()?;
        }

        info!(
            active = queue.active.len(),
            history = queue.history.len(),
            "Loaded job queue"
        );
        Ok(queue)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a job. Its status is forced to pending.
    pub fn add(&mut self, mut job: Job) -> Result<Job, QueueError> {
        job.status = JobStatus::Pending;
        job.progress = 0.0;
        self.active.push(job.clone());
        self.save()?;
        Ok(job)
    }

    /// Highest priority pending job; ties go to the earliest `created_at`, then insertion order.
    pub fn peek_highest_priority(&self) -> Option<&Job> {
        self.active
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .fold(None, |best: Option<&Job>, job| match best {
                Some(b)
                    if b.priority > job.priority
                        || (b.priority == job.priority && b.created_at <= job.created_at) =>
                {
                    Some(b)
                }
                _ => Some(job),
            })
    }

    /// Move the next job to `processing`. Returns `None` while another job is processing.
    pub fn dequeue(&mut self) -> Result<Option<Job>, QueueError> {
        if self.current().is_some() {
            return Ok(None);
        }
        let Some(id) = self.peek_highest_priority().map(|j| j.id.clone()) else {
            return Ok(None);
        };

        let job = self.active_mut(&id)?;
        job.status = JobStatus::Processing;
        job.progress = 0.0;
        job.started_at = Some(Utc::now());
        let job = job.clone();

        self.save()?;
        Ok(Some(job))
    }

    /// Mark a processing job complete.
    pub fn complete(&mut self, id: &str) -> Result<Job, QueueError> {
        let job = self.active_mut(id)?;
        if job.status != JobStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to: JobStatus::Complete,
            });
        }
        job.progress = 100.0;
        self.finish(id, JobStatus::Complete, None)
    }

    /// Mark a pending or processing job failed.
    pub fn fail(&mut self, id: &str, message: impl Into<String>) -> Result<Job, QueueError> {
        self.active_mut(id)?;
        self.finish(id, JobStatus::Error, Some(message.into()))
    }

    /// Withdraw a pending or processing job.
    pub fn cancel(&mut self, id: &str) -> Result<Job, QueueError> {
        self.active_mut(id)?;
        self.finish(id, JobStatus::Cancelled, None)
    }

    fn finish(
        &mut self,
        id: &str,
        status: JobStatus,
        error_message: Option<String>,
    ) -> Result<Job, QueueError> {
        let idx = self
            .active
            .iter()
            .position(|j| j.id == id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;

        let mut job = self.active.remove(idx);
        job.status = status;
        job.completed_at = Some(Utc::now());
        if error_message.is_some() {
            job.error_message = error_message;
        }
        self.history.push(job.clone());

        self.save()?;
        Ok(job)
    }

    /// Raise a processing job's progress. Values are clamped to 0-100 and never decrease.
    ///
    /// Returns the stored progress. Not persisted.
    pub fn update_progress(&mut self, id: &str, percent: f32) -> Result<f32, QueueError> {
        let job = self.active_mut(id)?;
        if job.status != JobStatus::Processing {
            return Err(QueueError::InvalidTransition {
                id: id.to_string(),
                from: job.status,
                to: JobStatus::Processing,
            });
        }
        if percent.is_finite() {
            job.progress = job.progress.max(percent.clamp(0.0, 100.0));
        }
        Ok(job.progress)
    }

    /// Look up an active or finished job.
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.active
            .iter()
            .chain(self.history.iter())
            .find(|j| j.id == id)
    }

    /// Pending and processing jobs in insertion order.
    pub fn active(&self) -> &[Job] {
        &self.active
    }

    /// Finished jobs oldest first; `limit` keeps only the most recent.
    pub fn history(&self, limit: Option<usize>) -> &[Job] {
        match limit {
            Some(n) if n < self.history.len() => &self.history[self.history.len() - n..],
            _ => &self.history,
        }
    }

    pub fn counts(&self) -> JobCounts {
        JobCounts::tally(self.active.iter().chain(self.history.iter()))
    }

    /// The job currently processing, if any.
    pub fn current(&self) -> Option<&Job> {
        self.active.iter().find(|j| j.status == JobStatus::Processing)
    }

    pub fn has_active_job_for(&self, input: &Path) -> bool {
        self.active.iter().any(|j| j.is_for(input))
    }

    /// Most recent completed job for an input path.
    pub fn last_completed_for(&self, input: &Path) -> Option<&Job> {
        self.history
            .iter()
            .rev()
            .find(|j| j.status == JobStatus::Complete && j.is_for(input))
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            active: self.active.clone(),
            history: self.history.clone(),
            saved_at: Utc::now(),
        }
    }

    fn active_mut(&mut self, id: &str) -> Result<&mut Job, QueueError> {
        if let Some(idx) = self.active.iter().position(|j| j.id == id) {
            return Ok(&mut self.active[idx]);
        }
        match self.history.iter().find(|j| j.id == id) {
            Some(job) => Err(QueueError::AlreadyTerminal {
                id: id.to_string(),
                status: job.status,
            }),
            None => Err(QueueError::NotFound(id.to_string())),
        }
    }

    fn save(&self) -> Result<(), QueueError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(&self.snapshot())?;
        let tmp = tmp_path(path);
        fs::write(&tmp, json)?;
        if let Err(e) = fs::rename(&tmp, path) {
            warn!(path = %path.display(), "Failed to replace queue file: {}", e);
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
