//! Monitor service loop.
//!
//! One task owns the watcher, the rule set and the queue. Each iteration it
//! scans the watch folder, enqueues stable files, runs at most one encode and
//! publishes a status snapshot. Every wait is interruptible by the handle's
//! cancellation token.

use crate::config::{ConfigError, MonitorConfig};
use crate::encode::{EncodeError, EncodeRequest, Encoder};
use crate::jobs::Job;
use crate::logging::LoggingError;
use crate::profile::{ProfileCatalog, ProfileError};
use crate::queue::{JobQueue, QueueError};
use crate::rules::RuleSet;
use crate::startup::StartupError;
use crate::status::{
    new_shared_status, CurrentJob, ServiceState, SharedStatus, StatusSnapshot, HISTORY_WINDOW,
    RECENT_HISTORY_LEN,
};
use crate::status_server::ServerError;
use crate::watcher::FileWatcher;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest error text stored on a job.
pub const MAX_ERROR_LEN: usize = 200;

/// Error message for jobs cut short by shutdown.
pub const SHUTDOWN_MESSAGE: &str = "encode interrupted by shutdown";

/// Error type for monitor operations
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A rule names a profile the catalog does not have
    #[error("Rule '{pattern}' references an unknown profile: {source}")]
    UnknownProfile {
        pattern: String,
        #[source]
        source: ProfileError,
    },

    /// Queue load or persistence failed
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Status server error
    #[error("Status server error: {0}")]
    Server(#[from] ServerError),

    /// Logging could not be initialised
    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runtime settings for the loop.
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub watch_directory: PathBuf,
    pub output_directory: PathBuf,
    pub poll_interval: Duration,
    /// Global delete-input switch, combined with each rule's flag
    pub delete_input: bool,
    pub max_attempts: u32,
    /// Pause after a failed iteration
    pub error_backoff: Duration,
}

impl MonitorSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            watch_directory: config.watch_directory.clone(),
            output_directory: config.output_directory.clone(),
            poll_interval: config.poll_interval_duration(),
            delete_input: config.delete_input,
            max_attempts: config.max_attempts.max(1),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Cloneable control handle for a running loop.
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    cancel: CancellationToken,
    paused: Arc<AtomicBool>,
    status: SharedStatus,
}

impl MonitorHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(AtomicBool::new(false)),
            status: new_shared_status(),
        }
    }

    /// Request shutdown. Cancels any in-flight encode. Safe to call repeatedly.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stop requested");
        }
        self.cancel.cancel();
    }

    /// Stop starting new encodes. Scanning continues.
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            info!("Processing paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            info!("Processing resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Copy of the latest published status.
    pub async fn snapshot(&self) -> StatusSnapshot {
        self.status.read().await.clone()
    }

    pub fn status(&self) -> SharedStatus {
        self.status.clone()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// The orchestrator.
pub struct MonitorLoop<E: Encoder> {
    settings: MonitorSettings,
    watcher: FileWatcher,
    rules: RuleSet,
    queue: JobQueue,
    catalog: Arc<ProfileCatalog>,
    encoder: E,
    handle: MonitorHandle,
    state: ServiceState,
}

impl<E: Encoder> MonitorLoop<E> {
    /// Assemble a loop from its parts.
    ///
    /// Fails if any rule names a profile missing from the catalog, or the
    /// output directory cannot be created.
    pub fn new(
        settings: MonitorSettings,
        watcher: FileWatcher,
        rules: RuleSet,
        queue: JobQueue,
        catalog: Arc<ProfileCatalog>,
        encoder: E,
    ) -> Result<Self, MonitorError> {
        for rule in rules.rules() {
            catalog
                .get(&rule.profile)
                .map_err(|source| MonitorError::UnknownProfile {
                    pattern: rule.pattern.clone(),
                    source,
                })?;
        }

        std::fs::create_dir_all(&settings.output_directory)?;

        Ok(Self {
            settings,
            watcher,
            rules,
            queue,
            catalog,
            encoder,
            handle: MonitorHandle::new(),
            state: ServiceState::Idle,
        })
    }

    /// Build every component from a validated config.
    pub fn from_config(config: &MonitorConfig, encoder: E) -> Result<Self, MonitorError> {
        let catalog = Arc::new(ProfileCatalog::builtin());
        let rules = RuleSet::from_configs(&config.rules);
        let watcher = FileWatcher::new(
            &config.watch_directory,
            config.extensions.as_deref(),
            config.ignore_hidden,
        );
        let queue = match &config.persist_path {
            Some(path) => JobQueue::open(path)?,
            None => JobQueue::in_memory(),
        };

        Self::new(
            MonitorSettings::from_config(config),
            watcher,
            rules,
            queue,
            catalog,
            encoder,
        )
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn watcher(&self) -> &FileWatcher {
        &self.watcher
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn catalog(&self) -> &Arc<ProfileCatalog> {
        &self.catalog
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Run until [`MonitorHandle::stop`] is called.
    pub async fn run(&mut self) {
        let cancel = self.handle.cancellation_token();

        self.state = ServiceState::Running;
        info!(
            watch = %self.settings.watch_directory.display(),
            output = %self.settings.output_directory.display(),
            poll_secs = self.settings.poll_interval.as_secs(),
            rules = self.rules.len(),
            "Monitor started"
        );
        self.publish_status().await;

        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_iteration().await {
                error!("Monitor iteration failed: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.settings.error_backoff) => {}
                }
            }
        }

        self.state = ServiceState::Stopping;
        self.publish_status().await;
        info!("Monitor stopping");

        self.state = ServiceState::Stopped;
        self.publish_status().await;
        info!("Monitor stopped");
    }

    /// One scan, at most one encode, then a status publish.
    pub async fn run_iteration(&mut self) -> Result<(), MonitorError> {
        let result = match self.scan_and_enqueue() {
            Ok(_) => self.drain_one().await.map(|_| ()),
            Err(e) => Err(e),
        };
        self.publish_status().await;
        result
    }

    /// Scan the watch folder and create jobs for newly stable files.
    ///
    /// Returns the number of jobs added.
    pub fn scan_and_enqueue(&mut self) -> Result<usize, MonitorError> {
        let new_files = self.watcher.scan();
        for file in &new_files {
            debug!(path = %file.path.display(), "Detected");
        }

        let mut added = 0;
        for file in self.watcher.stable_candidates() {
            let path = file.path.as_path();

            if self.queue.has_active_job_for(path) {
                self.watcher.mark_processing(path);
                continue;
            }

            let already_done = self
                .queue
                .last_completed_for(path)
                .and_then(|job| job.completed_at)
                .is_some_and(|done_at| done_at >= file.modified_utc());
            if already_done {
                debug!(path = %path.display(), "Already transcoded, skipping");
                self.watcher.mark_done(path);
                continue;
            }

            let rule = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|name| self.rules.match_filename(name));
            let Some(rule) = rule else {
                warn!(path = %path.display(), "No rule matches file, ignoring");
                self.watcher.mark_done(path);
                continue;
            };

            let output = rule.output_path(path, &self.settings.output_directory);
            let job = Job::new(path, output, &rule.profile, rule.priority)
                .with_delete_input(self.settings.delete_input && rule.delete_input);

            let job = self.queue.add(job)?;
            self.watcher.mark_processing(path);
            added += 1;

            info!(
                job_id = %job.id,
                input = %job.input_file.display(),
                output = %job.output_file.display(),
                profile = %job.profile_name,
                priority = job.priority,
                "Queued job"
            );
        }

        Ok(added)
    }

    /// Run the highest priority pending job, if any. Skipped while paused or stopping.
    ///
    /// Returns whether a job was taken.
    pub async fn drain_one(&mut self) -> Result<bool, MonitorError> {
        if self.handle.is_paused() || self.handle.is_stopped() {
            return Ok(false);
        }
        let Some(job) = self.queue.dequeue()? else {
            return Ok(false);
        };
        self.publish_status().await;

        let profile = match self.catalog.get(&job.profile_name) {
            Ok(profile) => profile.clone(),
            Err(e) => {
                error!(job_id = %job.id, "{}", e);
                let saved = self.queue.fail(&job.id, truncate_error(&e.to_string()));
                self.watcher.mark_done(&job.input_file);
                saved?;
                return Ok(true);
            }
        };

        if let Some(parent) = job.output_file.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let message = format!("Failed to create output directory {}: {}", parent.display(), e);
                error!(job_id = %job.id, "{}", message);
                let saved = self.queue.fail(&job.id, truncate_error(&message));
                self.record_file_failure(&job.input_file);
                saved?;
                return Ok(true);
            }
        }

        let request = EncodeRequest {
            job_id: job.id.clone(),
            input: job.input_file.clone(),
            output: job.output_file.clone(),
            profile,
        };

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<f32>();
        let result = {
            let encode = self
                .encoder
                .encode(&request, progress_tx, self.handle.cancel.child_token());
            tokio::pin!(encode);

            loop {
                tokio::select! {
                    result = &mut encode => break result,
                    Some(pct) = progress_rx.recv() => {
                        if let Ok(progress) = self.queue.update_progress(&job.id, pct) {
                            set_current_progress(&self.handle.status, progress).await;
                        }
                    }
                }
            }
        };
        while let Ok(pct) = progress_rx.try_recv() {
            let _ = self.queue.update_progress(&job.id, pct);
        }

        // The transition is applied in memory even if the save fails
        let saved = match result {
            Ok(()) => {
                let saved = self.queue.complete(&job.id);
                self.watcher.mark_done(&job.input_file);
                info!(
                    job_id = %job.id,
                    output = %job.output_file.display(),
                    "Transcode complete"
                );
                if job.delete_input {
                    delete_input(&job.input_file).await;
                }
                saved
            }
            Err(EncodeError::Cancelled) => {
                warn!(job_id = %job.id, input = %job.input_file.display(), "Encode interrupted");
                self.queue.fail(&job.id, SHUTDOWN_MESSAGE)
            }
            Err(e) => {
                let message = truncate_error(&e.to_string());
                error!(job_id = %job.id, input = %job.input_file.display(), "Transcode failed: {}", message);
                let saved = self.queue.fail(&job.id, message);
                self.record_file_failure(&job.input_file);
                saved
            }
        };
        saved?;

        Ok(true)
    }

    /// Retry while attempts remain, otherwise give up on the file.
    fn record_file_failure(&mut self, path: &Path) {
        let attempts = self.watcher.mark_error(path);
        if attempts >= self.settings.max_attempts {
            warn!(path = %path.display(), attempts, "Giving up on file");
            self.watcher.mark_done(path);
        } else if attempts > 0 {
            info!(path = %path.display(), attempts, "Will retry once the file is stable");
        }
    }

    /// Build and publish a fresh status snapshot.
    pub async fn publish_status(&self) {
        let snapshot = self.build_status();
        *self.handle.status.write().await = snapshot;
    }

    fn build_status(&self) -> StatusSnapshot {
        let paused = self.handle.is_paused();
        let state = match self.state {
            ServiceState::Running if paused => ServiceState::Paused,
            other => other,
        };
        let history = self.queue.history(Some(HISTORY_WINDOW));
        let recent_start = history.len().saturating_sub(RECENT_HISTORY_LEN);

        StatusSnapshot {
            state,
            running: matches!(state, ServiceState::Running | ServiceState::Paused),
            paused,
            watch_directory: self.settings.watch_directory.clone(),
            output_directory: self.settings.output_directory.clone(),
            poll_interval_secs: self.settings.poll_interval.as_secs(),
            counts: self.queue.counts(),
            current_job: self.queue.current().map(CurrentJob::from),
            rule_count: self.rules.len(),
            tracked_files: self.watcher.len(),
            files: self.watcher.counts(),
            active_jobs: self.queue.active().to_vec(),
            recent_history: history[recent_start..].to_vec(),
            history_window: history.to_vec(),
            updated_at: Some(Utc::now()),
        }
    }
}

async fn set_current_progress(status: &SharedStatus, progress: f32) {
    let mut snapshot = status.write().await;
    if let Some(current) = snapshot.current_job.as_mut() {
        current.progress = progress;
    }
}

async fn delete_input(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "Deleted input"),
        Err(e) => warn!(path = %path.display(), "Failed to delete input: {}", e),
    }
}

/// Cut an error message to [`MAX_ERROR_LEN`] characters.
pub fn truncate_error(message: &str) -> String {
    message.chars().take(MAX_ERROR_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuleConfig;
    use crate::jobs::JobStatus;
    use crate::watcher::FileState;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Clone, Copy, Debug, PartialEq)]
    enum Behavior {
        Succeed,
        Fail,
        /// Write partial output, then wait for cancellation
        Hang,
    }

    /// Encoder that records requests and writes a small output file.
    struct FakeEncoder {
        behavior: Behavior,
        calls: Arc<Mutex<Vec<EncodeRequest>>>,
        started: Arc<tokio::sync::Notify>,
        /// Directory created while encoding, used to make the next queue save fail
        obstruct: Option<PathBuf>,
    }

    impl FakeEncoder {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: Arc::new(Mutex::new(Vec::new())),
                started: Arc::new(tokio::sync::Notify::new()),
                obstruct: None,
            }
        }
    }

    #[async_trait]
    impl Encoder for FakeEncoder {
        async fn encode(
            &self,
            request: &EncodeRequest,
            progress: mpsc::UnboundedSender<f32>,
            cancel: CancellationToken,
        ) -> Result<(), EncodeError> {
            self.calls.lock().unwrap().push(request.clone());
            if let Some(dir) = &self.obstruct {
                fs::create_dir_all(dir)?;
            }
            match self.behavior {
                Behavior::Succeed => {
                    let _ = progress.send(50.0);
                    let _ = progress.send(30.0);
                    fs::write(&request.output, b"encoded")?;
                    let _ = progress.send(100.0);
                    Ok(())
                }
                Behavior::Fail => Err(EncodeError::Failed {
                    code: Some(1),
                    stderr: "x".repeat(500),
                }),
                Behavior::Hang => {
                    fs::write(&request.output, b"partial")?;
                    self.started.notify_one();
                    cancel.cancelled().await;
                    let _ = fs::remove_file(&request.output);
                    Err(EncodeError::Cancelled)
                }
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        watch: PathBuf,
        output: PathBuf,
        config: MonitorConfig,
    }

    fn fixture(rules: Vec<RuleConfig>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let watch = dir.path().join("incoming");
        let output = dir.path().join("output");
        fs::create_dir_all(&watch).unwrap();

        let mut config = MonitorConfig::new(&watch, &output);
        config.rules = rules;
        Fixture {
            _dir: dir,
            watch,
            output,
            config,
        }
    }

    fn qlab_rule() -> RuleConfig {
        RuleConfig {
            output_pattern: "{filename_no_ext}_qlab.mov".to_string(),
            ..RuleConfig::new("*_live.mov", "live-qlab")
        }
    }

    async fn settle(monitor: &mut MonitorLoop<FakeEncoder>) {
        // First pass detects, second pass sees the file stable
        monitor.run_iteration().await.unwrap();
        monitor.run_iteration().await.unwrap();
    }

    #[tokio::test]
    async fn test_stable_file_is_transcoded_and_deleted() {
        let fx = fixture(vec![qlab_rule()]);
        let input = fx.watch.join("show_live.mov");
        fs::write(&input, b"source").unwrap();

        let encoder = FakeEncoder::new(Behavior::Succeed);
        let calls = encoder.calls.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();

        monitor.run_iteration().await.unwrap();
        assert!(calls.lock().unwrap().is_empty(), "not stable after one scan");
        assert_eq!(monitor.watcher().get(&input).unwrap().state, FileState::Detected);

        monitor.run_iteration().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].profile.name, "live-qlab");
        assert_eq!(calls[0].output, fx.output.join("show_live_qlab.mov"));

        let history = monitor.queue().history(None);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Complete);
        assert_eq!(history[0].progress, 100.0);
        assert!(history[0].delete_input);
        assert!(!input.exists(), "input deleted after success");
        assert!(fx.output.join("show_live_qlab.mov").exists());

        let status = monitor.handle().snapshot().await;
        assert_eq!(status.counts.complete, 1);
        assert!(status.current_job.is_none());
        assert_eq!(status.recent_history.len(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_file_is_ignored() {
        let fx = fixture(vec![qlab_rule()]);
        let input = fx.watch.join("notes.mp4");
        fs::write(&input, b"x").unwrap();

        let encoder = FakeEncoder::new(Behavior::Succeed);
        let calls = encoder.calls.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();
        settle(&mut monitor).await;
        monitor.run_iteration().await.unwrap();

        assert!(calls.lock().unwrap().is_empty());
        assert!(monitor.queue().active().is_empty());
        assert_eq!(monitor.watcher().get(&input).unwrap().state, FileState::Done);
        assert!(input.exists());
    }

    #[tokio::test]
    async fn test_priority_order_and_per_rule_delete() {
        let fx = fixture(vec![
            RuleConfig {
                priority: 10,
                delete_input: false,
                ..RuleConfig::new("*.mov", "standard-playback")
            },
            RuleConfig {
                priority: 90,
                output_pattern: "archive/{filename}".to_string(),
                ..RuleConfig::new("archive_*.mov", "archival")
            },
        ]);
        fs::write(fx.watch.join("a_plain.mov"), b"x").unwrap();
        fs::write(fx.watch.join("archive_show.mov"), b"x").unwrap();

        let encoder = FakeEncoder::new(Behavior::Succeed);
        let calls = encoder.calls.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();
        settle(&mut monitor).await;
        monitor.run_iteration().await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].profile.name, "archival", "higher priority runs first");
        assert_eq!(calls[0].output, fx.output.join("archive/archive_show.mov"));
        assert_eq!(calls[1].profile.name, "standard-playback");

        assert!(!fx.watch.join("archive_show.mov").exists());
        assert!(fx.watch.join("a_plain.mov").exists(), "rule opted out of deletion");
    }

    #[tokio::test]
    async fn test_global_delete_switch_wins() {
        let mut fx = fixture(vec![qlab_rule()]);
        fx.config.delete_input = false;
        let input = fx.watch.join("show_live.mov");
        fs::write(&input, b"x").unwrap();

        let mut monitor = MonitorLoop::from_config(&fx.config, FakeEncoder::new(Behavior::Succeed)).unwrap();
        settle(&mut monitor).await;

        assert!(input.exists());
        assert!(!monitor.queue().history(None)[0].delete_input);

        // A completed file that is still present is not transcoded again
        monitor.run_iteration().await.unwrap();
        assert_eq!(monitor.queue().history(None).len(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_truncated_and_not_retried_by_default() {
        let fx = fixture(vec![qlab_rule()]);
        let input = fx.watch.join("show_live.mov");
        fs::write(&input, b"x").unwrap();

        let encoder = FakeEncoder::new(Behavior::Fail);
        let calls = encoder.calls.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();
        settle(&mut monitor).await;
        settle(&mut monitor).await;

        assert_eq!(calls.lock().unwrap().len(), 1);
        let failed = &monitor.queue().history(None)[0];
        assert_eq!(failed.status, JobStatus::Error);
        assert_eq!(failed.error_message.as_ref().unwrap().chars().count(), MAX_ERROR_LEN);
        assert!(input.exists(), "inputs are kept on failure");
        assert_eq!(monitor.watcher().get(&input).unwrap().state, FileState::Done);
    }

    #[tokio::test]
    async fn test_failure_retried_while_attempts_remain() {
        let mut fx = fixture(vec![qlab_rule()]);
        fx.config.max_attempts = 2;
        fs::write(fx.watch.join("show_live.mov"), b"x").unwrap();

        let encoder = FakeEncoder::new(Behavior::Fail);
        let calls = encoder.calls.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();
        settle(&mut monitor).await;
        // Back to detected; the next pass re-stabilises and retries
        monitor.run_iteration().await.unwrap();
        monitor.run_iteration().await.unwrap();
        settle(&mut monitor).await;

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(monitor.queue().counts().error, 2);
    }

    #[tokio::test]
    async fn test_failed_queue_save_still_finishes_file() {
        let mut fx = fixture(vec![qlab_rule()]);
        let persist = fx.watch.parent().unwrap().join("state/queue.json");
        fx.config.persist_path = Some(persist.clone());
        let input = fx.watch.join("show_live.mov");
        fs::write(&input, b"x").unwrap();

        // A directory where the temp file goes makes the save after the encode fail
        let mut encoder = FakeEncoder::new(Behavior::Succeed);
        encoder.obstruct = Some(persist.with_file_name("queue.json.tmp"));
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();

        monitor.run_iteration().await.unwrap();
        let result = monitor.run_iteration().await;

        assert!(matches!(result, Err(MonitorError::Queue(_))));
        assert_eq!(monitor.queue().counts().complete, 1);
        assert_eq!(monitor.watcher().get(&input).unwrap().state, FileState::Done);
        assert!(!input.exists(), "input deleted despite the save failure");
    }

    #[tokio::test]
    async fn test_pause_blocks_new_encodes() {
        let fx = fixture(vec![qlab_rule()]);
        fs::write(fx.watch.join("show_live.mov"), b"x").unwrap();

        let encoder = FakeEncoder::new(Behavior::Succeed);
        let calls = encoder.calls.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();
        let handle = monitor.handle();

        handle.pause();
        settle(&mut monitor).await;
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(monitor.queue().counts().pending, 1, "scanning continues while paused");

        handle.resume();
        monitor.run_iteration().await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_profile_rejected() {
        let fx = fixture(vec![RuleConfig::new("*.mov", "vp9-web")]);

        let result = MonitorLoop::from_config(&fx.config, FakeEncoder::new(Behavior::Succeed));
        assert!(matches!(result, Err(MonitorError::UnknownProfile { .. })));
    }

    #[tokio::test]
    async fn test_recovered_job_runs_after_restart() {
        let mut fx = fixture(vec![qlab_rule()]);
        let persist = fx.watch.parent().unwrap().join("state/queue.json");
        fx.config.persist_path = Some(persist.clone());
        let input = fx.watch.join("show_live.mov");
        fs::write(&input, b"x").unwrap();

        // A previous run crashed mid-encode
        {
            let mut queue = JobQueue::open(&persist).unwrap();
            let job = Job::new(&input, fx.output.join("show_live_qlab.mov"), "live-qlab", 100);
            queue.add(job).unwrap();
            queue.dequeue().unwrap();
        }

        let encoder = FakeEncoder::new(Behavior::Succeed);
        let calls = encoder.calls.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();
        assert_eq!(monitor.queue().counts().pending, 1);

        // The recovered job is dequeued on the first pass, before the file is stable
        monitor.run_iteration().await.unwrap();
        assert_eq!(calls.lock().unwrap().len(), 1);
        settle(&mut monitor).await;

        assert_eq!(calls.lock().unwrap().len(), 1, "no duplicate job for the same input");
        assert_eq!(monitor.queue().counts().complete, 1);
    }

    #[tokio::test]
    async fn test_stop_interrupts_encode_and_records_failure() {
        let mut fx = fixture(vec![qlab_rule()]);
        fx.config.poll_interval = 1;
        let input = fx.watch.join("show_live.mov");
        fs::write(&input, b"x").unwrap();

        let encoder = FakeEncoder::new(Behavior::Hang);
        let started = encoder.started.clone();
        let mut monitor = MonitorLoop::from_config(&fx.config, encoder).unwrap();
        let handle = monitor.handle();

        let task = tokio::spawn(async move {
            monitor.run().await;
            monitor
        });

        tokio::time::timeout(Duration::from_secs(10), started.notified())
            .await
            .expect("encode should start");
        handle.stop();
        handle.stop();

        let monitor = tokio::time::timeout(Duration::from_secs(10), task)
            .await
            .expect("loop should exit")
            .unwrap();

        assert_eq!(monitor.state(), ServiceState::Stopped);
        let job = &monitor.queue().history(None)[0];
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.error_message.as_deref(), Some(SHUTDOWN_MESSAGE));
        assert!(!fx.output.join("show_live_qlab.mov").exists(), "partial output removed");
        assert!(input.exists());
        assert_eq!(handle.snapshot().await.state, ServiceState::Stopped);
    }

    #[test]
    fn test_truncate_error() {
        assert_eq!(truncate_error("short"), "short");
        let long = "é".repeat(300);
        assert_eq!(truncate_error(&long).chars().count(), MAX_ERROR_LEN);
    }
}
