//! Transcode job model.
//!
//! A job is created `pending`, becomes `processing` only when the queue hands
//! it out, and ends in one of the terminal states. Timestamps are UTC and
//! serialize as RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be picked up.
    Pending,
    /// Handed to the encoder.
    Processing,
    /// Encoded successfully.
    Complete,
    /// Encoder failed or the job could not run.
    Error,
    /// Withdrawn before completion.
    #[serde(alias = "skipped")]
    Cancelled,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl JobStatus {
    /// Complete, error and cancelled are final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Error => write!(f, "error"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

fn new_job_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_priority() -> i64 {
    100
}

/// One transcode of one input file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job identifier (UUID v4). Files written before ids existed get a fresh one.
    #[serde(default = "new_job_id")]
    pub id: String,
    pub input_file: PathBuf,
    pub output_file: PathBuf,
    pub profile_name: String,
    #[serde(default)]
    pub status: JobStatus,
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Percent complete, 0-100.
    #[serde(default)]
    pub progress: f32,
    #[serde(default = "Utc::now", with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Remove the input once the encode completes.
    #[serde(default)]
    pub delete_input: bool,
}

impl Job {
    /// Create a pending job with a fresh id.
    pub fn new(
        input_file: impl Into<PathBuf>,
        output_file: impl Into<PathBuf>,
        profile_name: impl Into<String>,
        priority: i64,
    ) -> Self {
        Self {
            id: new_job_id(),
            input_file: input_file.into(),
            output_file: output_file.into(),
            profile_name: profile_name.into(),
            status: JobStatus::Pending,
            priority,
            progress: 0.0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            delete_input: false,
        }
    }

    pub fn with_delete_input(mut self, delete_input: bool) -> Self {
        self.delete_input = delete_input;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending or processing.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn is_for(&self, input: &Path) -> bool {
        self.input_file == input
    }

    /// Input file name for display.
    pub fn input_name(&self) -> String {
        self.input_file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_file.display().to_string())
    }
}

/// RFC 3339 timestamps, also accepting the naive `YYYY-MM-DDTHH:MM:SS[.f]` form (read as UTC).
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&dt.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s)))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                None => Ok(None),
                Some(s) if s.is_empty() => Ok(None),
                Some(s) => super::parse(&s)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", s))),
            }
        }
    }
}
