//! Job records for the encode queue.
//!
//! A [`JobRecord`] is created on enqueue and mutated only by the supervisor while
//! it is the current job. Once it reaches a terminal state it never changes again.

use crate::progress::FpsWindow;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of log lines retained for the current job
pub const LOG_CAPACITY: usize = 100;

/// Prefix of staging files in the temp directory
pub const TEMP_PREFIX: &str = "temp_";

/// Creation-ordered job identifier
pub type JobId = u64;

static LAST_JOB_ID: AtomicU64 = AtomicU64::new(0);

/// Allocate a new job id.
///
/// Ids are seeded from the wall clock in milliseconds and strictly increase even
/// when several jobs are created within the same millisecond.
pub fn next_job_id() -> JobId {
    let now = current_timestamp_ms().max(0) as u64;
    let mut last = LAST_JOB_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_JOB_ID.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(actual) => last = actual,
        }
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "error")]
pub enum JobState {
    /// Waiting in the queue
    Queued,
    /// Encoder running, output being consumed
    Running,
    /// Encoder running, output consumption frozen
    Paused,
    /// Encoder exited 0 and the output was promoted
    Completed,
    /// Launch failure, non-zero exit or file error
    Failed(String),
    /// Terminated by the cancel action
    Cancelled,
    /// Terminated by the stop action
    Stopped,
}

impl JobState {
    /// Convert state to the label used by the status views
    pub fn as_str(&self) -> &str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "encoding",
            JobState::Paused => "paused",
            JobState::Completed => "completed",
            JobState::Failed(_) => "failed",
            JobState::Cancelled => "cancelled",
            JobState::Stopped => "stopped",
        }
    }

    /// Completed, Failed, Cancelled or Stopped
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed(_) | JobState::Cancelled | JobState::Stopped
        )
    }

    /// Running or Paused, i.e. the job owns the encoder
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Paused)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a running job was terminated by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Stop,
    Cancel,
}

impl Termination {
    pub fn terminal_state(self) -> JobState {
        match self {
            Termination::Stop => JobState::Stopped,
            Termination::Cancel => JobState::Cancelled,
        }
    }

    /// Past-tense verb used in log and status messages
    pub fn verb(self) -> &'static str {
        match self {
            Termination::Stop => "stopped",
            Termination::Cancel => "cancelled",
        }
    }
}

/// Logical reference to an input file inside the media directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// File name as shown to the user
    pub name: String,
    /// Path relative to the media directory, for files in subdirectories
    pub path: Option<PathBuf>,
}

impl SourceRef {
    pub fn new(name: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }

    /// Path relative to the media directory
    pub fn relative_path(&self) -> &Path {
        self.path
            .as_deref()
            .unwrap_or_else(|| Path::new(&self.name))
    }

    /// Identity used for duplicate detection, with `.` components dropped
    pub fn key(&self) -> PathBuf {
        self.relative_path()
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect()
    }

    /// Reject empty or nested names and paths escaping the media directory
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("source file name is empty".to_string());
        }
        let mut name_parts = Path::new(&self.name).components();
        let plain_name = matches!(
            (name_parts.next(), name_parts.next()),
            (Some(Component::Normal(_)), None)
        );
        if !plain_name {
            return Err(format!("source name '{}' must be a plain file name", self.name));
        }
        let escapes = |p: &Path| {
            p.components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        };
        if escapes(self.relative_path()) {
            return Err(format!(
                "source '{}' must be relative to the media directory",
                self.relative_path().display()
            ));
        }
        Ok(())
    }

    /// File name without its extension
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

/// Live encode metrics for one job
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveMetrics {
    pub current_fps: f64,
    pub average_fps: f64,
    pub frames_done: u64,
    pub frames_total: u64,
    /// Remaining seconds reported by the encoder
    pub reported_eta_secs: Option<u64>,
    /// Remaining seconds computed from frames and fps
    pub computed_eta_secs: Option<u64>,
}

impl LiveMetrics {
    /// Remaining seconds, preferring the encoder's own estimate
    pub fn remaining_secs(&self) -> Option<u64> {
        self.reported_eta_secs.or(self.computed_eta_secs)
    }
}

/// Represents one encode request and its runtime state.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub source: SourceRef,
    /// Preset file name inside the preset directory
    pub preset: String,
    /// Output container extension, e.g. `mp4`
    pub output_format: String,
    pub state: JobState,
    /// Percent complete, 0..=100, never decreasing while active
    pub progress: f64,
    pub metrics: LiveMetrics,
    pub input_size_bytes: u64,
    pub final_output_size_bytes: u64,
    pub live_output_size_bytes: u64,
    /// Staging path, set when the job starts
    pub temp_output_path: Option<PathBuf>,
    pub started_at_ms: Option<i64>,
    pub ended_at_ms: Option<i64>,
}

impl JobRecord {
    /// Create a new queued job
    pub fn new(
        source: SourceRef,
        preset: impl Into<String>,
        output_format: impl Into<String>,
    ) -> Self {
        Self {
            id: next_job_id(),
            source,
            preset: preset.into(),
            output_format: output_format.into(),
            state: JobState::Queued,
            progress: 0.0,
            metrics: LiveMetrics::default(),
            input_size_bytes: 0,
            final_output_size_bytes: 0,
            live_output_size_bytes: 0,
            temp_output_path: None,
            started_at_ms: None,
            ended_at_ms: None,
        }
    }

    /// Error text, present only in the Failed state
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            JobState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    /// File name of the final output
    pub fn output_file_name(&self) -> String {
        format!("{}.{}", self.source.stem(), self.output_format)
    }

    /// File name of the staging output
    pub fn temp_file_name(&self) -> String {
        format!("{}{}_{}", TEMP_PREFIX, self.id, self.source.name)
    }

    /// Merge a new percent value, never moving backwards
    pub fn record_progress(&mut self, percent: f64) {
        if percent.is_finite() {
            self.progress = self.progress.max(percent.clamp(0.0, 100.0));
        }
    }

    /// Move Queued -> Running
    pub fn mark_running(&mut self) {
        self.state = JobState::Running;
        self.started_at_ms = Some(current_timestamp_ms());
        self.ended_at_ms = None;
    }

    /// Move into a terminal state; ignored if already terminal
    pub fn finish(&mut self, state: JobState) -> bool {
        if self.state.is_terminal() || !state.is_terminal() {
            return false;
        }
        self.state = state;
        self.ended_at_ms = Some(current_timestamp_ms());
        true
    }

    /// Milliseconds since start, up to `ended_at` once terminal
    pub fn elapsed_ms(&self) -> Option<i64> {
        let start = self.started_at_ms?;
        let end = self.ended_at_ms.unwrap_or_else(current_timestamp_ms);
        Some((end - start).max(0))
    }
}

/// Severity of a job log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    Info,
    Success,
    Warning,
    Error,
}

/// One line of the current job's log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp_ms: i64,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

/// Bounded log of the most recent entries
#[derive(Debug, Clone, Default)]
pub struct JobLog {
    entries: VecDeque<LogEntry>,
}

impl JobLog {
    pub fn push(&mut self, kind: LogKind, message: impl Into<String>) {
        if self.entries.len() >= LOG_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp_ms: current_timestamp_ms(),
            message: message.into(),
            kind,
        });
    }

    /// Last `n` entries, oldest first
    pub fn tail(&self, n: usize) -> Vec<LogEntry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-run parser state, reset whenever a new job starts
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub fps_window: FpsWindow,
    pub log: JobLog,
    /// Set once the encoder has printed its own ETA for this run
    pub reported_eta_seen: bool,
}

impl RunContext {
    pub fn reset(&mut self) {
        self.fps_window.clear();
        self.log.clear();
        self.reported_eta_seen = false;
    }
}
