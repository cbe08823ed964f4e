//! Read-only status views for the HTTP layer.
//!
//! Every view renders neutral placeholders when there is no current job.

use crate::job::{JobId, JobLog, JobRecord, JobState, LogEntry};
use crate::progress::{format_clock, format_optional_clock};
use crate::queue::JobQueue;
use serde::Serialize;
use std::collections::VecDeque;

/// Log entries surfaced by the detail view
pub const LOG_TAIL: usize = 20;

/// Terminal jobs retained in memory
pub const HISTORY_CAPACITY: usize = 100;

const PLACEHOLDER: &str = "-";

/// Per-job row of the queue view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobView {
    pub id: JobId,
    pub filename: String,
    pub path: Option<String>,
    pub preset: String,
    pub format: String,
    pub status: String,
    pub progress: f64,
    pub input_size_bytes: u64,
    pub output_size_bytes: u64,
    pub current_output_size_bytes: u64,
    pub current_fps: f64,
    pub average_fps: f64,
    pub time_elapsed: String,
    pub time_remaining: String,
    pub eta: String,
    pub paused: bool,
    pub error: Option<String>,
}

impl JobView {
    pub fn from_record(job: &JobRecord) -> Self {
        let current_output_size_bytes = if job.state.is_active() {
            job.live_output_size_bytes
        } else {
            job.final_output_size_bytes
        };
        let remaining = format_optional_clock(job.metrics.remaining_secs());

        Self {
            id: job.id,
            filename: job.source.name.clone(),
            path: job.source.path.as_ref().map(|p| p.display().to_string()),
            preset: job.preset.clone(),
            format: job.output_format.clone(),
            status: job.state.to_string(),
            progress: job.progress,
            input_size_bytes: job.input_size_bytes,
            output_size_bytes: job.final_output_size_bytes,
            current_output_size_bytes,
            current_fps: job.metrics.current_fps,
            average_fps: job.metrics.average_fps,
            time_elapsed: format_elapsed(job),
            time_remaining: remaining.clone(),
            eta: remaining,
            paused: job.state == JobState::Paused,
            error: job.error().map(str::to_string),
        }
    }
}

/// Queue view: pending jobs in run order plus the current job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSnapshot {
    pub queue: Vec<JobView>,
    pub current: Option<JobView>,
    pub status: String,
    pub progress: f64,
    pub paused: bool,
}

pub fn queue_snapshot(queue: &JobQueue, status_message: &str) -> QueueSnapshot {
    let current = queue.current().map(JobView::from_record);
    QueueSnapshot {
        queue: queue.pending().map(JobView::from_record).collect(),
        progress: current.as_ref().map(|c| c.progress).unwrap_or(0.0),
        paused: current.as_ref().map(|c| c.paused).unwrap_or(false),
        current,
        status: status_message.to_string(),
    }
}

/// Live detail of the current job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EncodingDetail {
    pub current_fps: f64,
    pub average_fps: f64,
    pub eta: String,
    pub reported_eta: String,
    pub time_elapsed: String,
    pub time_remaining: String,
    pub encoding_log: Vec<LogEntry>,
    pub frames_processed: u64,
    pub total_frames: u64,
    pub input_file: String,
    pub input_size: String,
    pub output_size: String,
    pub size_reduction: String,
    pub preset: String,
    pub format: String,
    pub paused: bool,
}

pub fn encoding_detail(current: Option<&JobRecord>, log: &JobLog) -> EncodingDetail {
    let encoding_log = log.tail(LOG_TAIL);

    let Some(job) = current else {
        return EncodingDetail {
            current_fps: 0.0,
            average_fps: 0.0,
            eta: format_optional_clock(None),
            reported_eta: format_optional_clock(None),
            time_elapsed: format_clock(0),
            time_remaining: format_optional_clock(None),
            encoding_log,
            frames_processed: 0,
            total_frames: 0,
            input_file: PLACEHOLDER.to_string(),
            input_size: PLACEHOLDER.to_string(),
            output_size: PLACEHOLDER.to_string(),
            size_reduction: PLACEHOLDER.to_string(),
            preset: PLACEHOLDER.to_string(),
            format: PLACEHOLDER.to_string(),
            paused: false,
        };
    };

    let output_bytes = if job.live_output_size_bytes > 0 {
        job.live_output_size_bytes
    } else {
        job.final_output_size_bytes
    };
    let remaining = format_optional_clock(job.metrics.remaining_secs());

    EncodingDetail {
        current_fps: job.metrics.current_fps,
        average_fps: job.metrics.average_fps,
        eta: remaining.clone(),
        reported_eta: format_optional_clock(job.metrics.reported_eta_secs),
        time_elapsed: format_elapsed(job),
        time_remaining: remaining,
        encoding_log,
        frames_processed: job.metrics.frames_done,
        total_frames: job.metrics.frames_total,
        input_file: job.source.name.clone(),
        input_size: if job.input_size_bytes > 0 {
            format_mb(job.input_size_bytes)
        } else {
            PLACEHOLDER.to_string()
        },
        output_size: if output_bytes > 0 {
            format_mb(output_bytes)
        } else {
            PLACEHOLDER.to_string()
        },
        size_reduction: if job.input_size_bytes > 0 {
            format_reduction(job.input_size_bytes, output_bytes)
        } else {
            PLACEHOLDER.to_string()
        },
        preset: job.preset.clone(),
        format: job.output_format.clone(),
        paused: job.state == JobState::Paused,
    }
}

/// Record of one Completed or Failed job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub id: JobId,
    pub filename: String,
    pub output_filename: String,
    pub preset: String,
    pub format: String,
    pub status: String,
    pub input_size_bytes: u64,
    pub output_size_bytes: u64,
    pub average_fps: f64,
    pub started_at_ms: Option<i64>,
    pub ended_at_ms: Option<i64>,
    pub duration: String,
    pub reduction: String,
    pub error: Option<String>,
}

impl HistoryEntry {
    pub fn from_record(job: &JobRecord) -> Self {
        Self {
            id: job.id,
            filename: job.source.name.clone(),
            output_filename: job.output_file_name(),
            preset: job.preset.clone(),
            format: job.output_format.clone(),
            status: job.state.to_string(),
            input_size_bytes: job.input_size_bytes,
            output_size_bytes: job.final_output_size_bytes,
            average_fps: job.metrics.average_fps,
            started_at_ms: job.started_at_ms,
            ended_at_ms: job.ended_at_ms,
            duration: format_elapsed(job),
            reduction: format_reduction(job.input_size_bytes, job.final_output_size_bytes),
            error: job.error().map(str::to_string),
        }
    }
}

/// Bounded, append-only record of terminal jobs
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }
}

impl History {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Most recent `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Size reduction as a percentage string; `"0%"` for empty input
pub fn format_reduction(input_bytes: u64, output_bytes: u64) -> String {
    if input_bytes == 0 {
        return "0%".to_string();
    }
    let reduction = (input_bytes as f64 - output_bytes as f64) / input_bytes as f64 * 100.0;
    format!("{:.1}%", reduction)
}

/// Bytes as megabytes with two decimals
pub fn format_mb(bytes: u64) -> String {
    format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
}

fn format_elapsed(job: &JobRecord) -> String {
    let secs = job.elapsed_ms().map(|ms| (ms / 1000) as u64).unwrap_or(0);
    format_clock(secs)
}
