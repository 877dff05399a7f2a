//! bulletproof
//!
//! Watch-folder transcoding service: polls a directory, matches stable files
//! against rules, queues jobs and runs them one at a time through ffmpeg.

pub mod encode;
pub mod jobs;
pub mod logging;
pub mod monitor;
pub mod profile;
pub mod queue;
pub mod rules;
pub mod startup;
pub mod status;
pub mod status_server;
pub mod watcher;

pub use bulletproof_config as config;
pub use bulletproof_config::MonitorConfig;
pub use encode::{EncodeError, EncodeRequest, Encoder, FfmpegEncoder};
pub use jobs::{Job, JobStatus};
pub use logging::{init_logging, LoggingError};
pub use monitor::{MonitorError, MonitorHandle, MonitorLoop, MonitorSettings};
pub use profile::{Codec, Profile, ProfileCatalog, ProfileError};
pub use queue::{JobCounts, JobQueue, QueueError, QueueSnapshot};
pub use rules::{Rule, RuleError, RuleSet};
pub use startup::{run_startup_checks, StartupError};
pub use status::{format_queue_report, ServiceState, SharedStatus, StatusSnapshot};
pub use status_server::{create_status_router, run_status_server, ServerError};
pub use watcher::{FileInfo, FileState, FileWatcher};
