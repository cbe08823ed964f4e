//! Job supervisor for the transcode queue
//!
//! Owns the queue and runs at most one encoder at a time. A single driver loop
//! ([`Supervisor::run`]) takes the next job, streams the encoder output through
//! the progress parser, and settles the job into exactly one terminal state
//! before moving on. Control calls (pause, resume, stop, cancel) travel to the
//! driver over a watch channel; status queries only take the read lock.

use crate::encoder::{check_exit, EncodeParams, EncoderProcess, EncoderSettings, RunError};
use crate::job::{JobId, JobRecord, JobState, LogKind, RunContext, SourceRef, Termination};
use crate::progress::{parse_line, EtaSource, ProgressEvent};
use crate::promote::{promote_output, remove_if_exists};
use crate::queue::{Direction, JobQueue, QueueError};
use crate::status::{self, EncodingDetail, History, HistoryEntry, QueueSnapshot};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use transcode_queue_config::Config;

/// Interval between temp output size samples
pub const SIZE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

const IDLE_STATUS: &str = "Idle";

/// Error type for control-surface operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Pause, resume, stop or cancel with nothing running
    #[error("No job is currently running")]
    NoActiveJob,

    #[error("Preset '{0}' not found")]
    PresetNotFound(String),

    #[error("Invalid source: {0}")]
    InvalidSource(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Request to add a job to the queue
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnqueueRequest {
    /// File name of the source
    pub file: String,
    /// Preset file name inside the preset directory
    pub preset: String,
    #[serde(default = "default_format")]
    pub format: String,
    /// Path relative to the media directory, for nested files
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_format() -> String {
    "mp4".to_string()
}

impl EnqueueRequest {
    pub fn new(file: impl Into<String>, preset: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            preset: preset.into(),
            format: default_format(),
            path: None,
        }
    }
}

/// Result of [`Supervisor::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    NothingQueued,
}

/// Directories and encoder settings the supervisor works with
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub media_dir: PathBuf,
    pub preset_dir: PathBuf,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub encoder: EncoderSettings,
    /// Entries returned by the history view
    pub history_limit: usize,
}

impl SupervisorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            media_dir: config.paths.media_dir.clone(),
            preset_dir: config.paths.preset_dir.clone(),
            output_dir: config.paths.output_dir.clone(),
            temp_dir: config.paths.temp_dir.clone(),
            encoder: EncoderSettings::from_config(&config.encoder),
            history_limit: config.status.history_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    Pause,
    Stop { job: JobId, kind: Termination },
}

#[derive(Debug)]
struct SupervisorState {
    queue: JobQueue,
    run: RunContext,
    history: History,
    status_message: String,
    encoder_pid: Option<u32>,
}

struct Shared {
    config: SupervisorConfig,
    state: RwLock<SupervisorState>,
    control: watch::Sender<Control>,
    current: watch::Sender<Option<JobId>>,
    wake: Notify,
}

/// Handle to the job supervisor; clones share the same state
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

/// Everything the driver needs to run the current job
#[derive(Debug, Clone)]
struct PreparedRun {
    id: JobId,
    file_name: String,
    input_path: PathBuf,
    temp_output_path: PathBuf,
    final_output_path: PathBuf,
    preset_path: PathBuf,
}

enum RunOutcome {
    Exited,
    Terminated(Termination),
}

enum Settlement {
    Completed(u64),
    Failed(String),
    Terminated(Termination),
}

/// Aborts the size sampler when the run ends
struct SamplerGuard(JoinHandle<()>);

impl Drop for SamplerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (control, _) = watch::channel(Control::Run);
        let (current, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                config,
                state: RwLock::new(SupervisorState {
                    queue: JobQueue::new(),
                    run: RunContext::default(),
                    history: History::default(),
                    status_message: IDLE_STATUS.to_string(),
                    encoder_pid: None,
                }),
                control,
                current,
                wake: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    /// Spawn the driver loop on the current runtime
    pub fn spawn(&self) -> JoinHandle<()> {
        let supervisor = self.clone();
        tokio::spawn(async move { supervisor.run().await })
    }

    /// Driver loop: run queued jobs one after another, sleeping while idle.
    ///
    /// Nothing runs until [`Supervisor::start`]. From then on a finished job is
    /// followed immediately by the next queued one until the queue is empty.
    pub async fn run(&self) {
        loop {
            self.shared.wake.notified().await;
            while let Some(run) = self.begin_next().await {
                self.run_job(run).await;
            }
        }
    }

    /// Validate and queue a new job. Does not start it.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, SupervisorError> {
        let source = SourceRef::new(request.file, request.path);
        source.validate().map_err(SupervisorError::InvalidSource)?;

        let format = request.format.trim();
        if format.is_empty() || !format.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(SupervisorError::InvalidRequest(format!(
                "unsupported output format '{}'",
                request.format
            )));
        }

        let preset_path = self.preset_path(&request.preset)?;
        match tokio::fs::metadata(&preset_path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(SupervisorError::PresetNotFound(request.preset)),
        }

        let input_path = self.shared.config.media_dir.join(source.relative_path());
        let input_size = tokio::fs::metadata(&input_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let mut job = JobRecord::new(source, request.preset, format);
        job.input_size_bytes = input_size;
        let name = job.source.name.clone();

        let id = self.shared.state.write().await.queue.enqueue(job)?;
        info!(job_id = id, file = %name, "Job queued");
        Ok(id)
    }

    /// Wake the driver if it is idle and something is queued
    pub async fn start(&self) -> StartOutcome {
        let state = self.shared.state.read().await;
        if state.queue.current().is_some() {
            return StartOutcome::AlreadyRunning;
        }
        if state.queue.is_empty() {
            return StartOutcome::NothingQueued;
        }
        self.shared.wake.notify_one();
        StartOutcome::Started
    }

    /// Freeze output consumption of the current job
    pub async fn pause(&self) -> Result<JobId, SupervisorError> {
        let mut guard = self.shared.state.write().await;
        let state = &mut *guard;
        let job = state.queue.current_mut().ok_or(SupervisorError::NoActiveJob)?;

        if job.state == JobState::Running && *self.shared.control.borrow() == Control::Run {
            job.state = JobState::Paused;
            self.shared.control.send_replace(Control::Pause);
            state.run.log.push(LogKind::Info, "Encoding paused");
            info!(job_id = job.id, "Job paused");
        }
        Ok(job.id)
    }

    /// Resume output consumption of a paused job
    pub async fn resume(&self) -> Result<JobId, SupervisorError> {
        let mut guard = self.shared.state.write().await;
        let state = &mut *guard;
        let job = state.queue.current_mut().ok_or(SupervisorError::NoActiveJob)?;

        if job.state == JobState::Paused && *self.shared.control.borrow() == Control::Pause {
            job.state = JobState::Running;
            self.shared.control.send_replace(Control::Run);
            state.run.log.push(LogKind::Info, "Encoding resumed");
            info!(job_id = job.id, "Job resumed");
        }
        Ok(job.id)
    }

    /// Terminate the current job as Stopped; returns once it has settled
    pub async fn stop(&self) -> Result<JobId, SupervisorError> {
        self.terminate(Termination::Stop).await
    }

    /// Terminate the current job as Cancelled; returns once it has settled
    pub async fn cancel(&self) -> Result<JobId, SupervisorError> {
        self.terminate(Termination::Cancel).await
    }

    async fn terminate(&self, kind: Termination) -> Result<JobId, SupervisorError> {
        let mut current = self.shared.current.subscribe();
        let id = {
            let state = self.shared.state.read().await;
            let id = state
                .queue
                .current()
                .map(|job| job.id)
                .ok_or(SupervisorError::NoActiveJob)?;
            self.shared.control.send_replace(Control::Stop { job: id, kind });
            id
        };
        info!(job_id = id, action = kind.verb(), "Termination requested");

        // The sender lives as long as `self`, so this only returns once the job settles.
        let _ = current.wait_for(|job| *job != Some(id)).await;
        Ok(id)
    }

    /// Remove a queued job
    pub async fn remove(&self, id: JobId) -> Result<(), SupervisorError> {
        let removed = self.shared.state.write().await.queue.remove(id)?;
        info!(job_id = id, file = %removed.source.name, "Job removed");
        Ok(())
    }

    /// Swap a queued job with its neighbour; unknown ids are ignored
    pub async fn move_job(&self, id: JobId, direction: Direction) -> bool {
        self.shared.state.write().await.queue.move_job(id, direction)
    }

    /// Drop every queued job; the current job keeps running
    pub async fn clear(&self) -> usize {
        let removed = self.shared.state.write().await.queue.clear();
        info!(removed, "Queue cleared");
        removed
    }

    pub async fn queue_snapshot(&self) -> QueueSnapshot {
        let state = self.shared.state.read().await;
        status::queue_snapshot(&state.queue, &state.status_message)
    }

    pub async fn encoding_detail(&self) -> EncodingDetail {
        let state = self.shared.state.read().await;
        status::encoding_detail(state.queue.current(), &state.run.log)
    }

    /// Most recent terminal jobs, up to the configured limit
    pub async fn history(&self) -> Vec<HistoryEntry> {
        let state = self.shared.state.read().await;
        state.history.recent(self.shared.config.history_limit)
    }

    pub async fn status_message(&self) -> String {
        self.shared.state.read().await.status_message.clone()
    }

    /// Process id of the running encoder, if any
    pub async fn encoder_pid(&self) -> Option<u32> {
        self.shared.state.read().await.encoder_pid
    }

    fn preset_path(&self, preset: &str) -> Result<PathBuf, SupervisorError> {
        let is_plain_name = !preset.trim().is_empty()
            && Path::new(preset).file_name().map(|n| n == preset).unwrap_or(false);
        if !is_plain_name {
            return Err(SupervisorError::PresetNotFound(preset.to_string()));
        }
        Ok(self.shared.config.preset_dir.join(preset))
    }

    /// Make the next queued job current and reset per-run state
    async fn begin_next(&self) -> Option<PreparedRun> {
        let config = &self.shared.config;
        let mut guard = self.shared.state.write().await;
        let state = &mut *guard;

        let job = state.queue.begin_next()?;
        let temp_output_path = absolute(config.temp_dir.join(job.temp_file_name()));
        job.temp_output_path = Some(temp_output_path.clone());

        let run = PreparedRun {
            id: job.id,
            file_name: job.source.name.clone(),
            input_path: absolute(config.media_dir.join(job.source.relative_path())),
            temp_output_path,
            final_output_path: absolute(config.output_dir.join(job.output_file_name())),
            preset_path: absolute(config.preset_dir.join(&job.preset)),
        };

        state.run.reset();
        state
            .run
            .log
            .push(LogKind::Info, format!("Starting encode of {}", run.file_name));
        state.status_message = format!("Encoding {}: 0.0%", run.file_name);

        self.shared.control.send_replace(Control::Run);
        self.shared.current.send_replace(Some(run.id));
        info!(job_id = run.id, file = %run.file_name, "Job started");
        Some(run)
    }

    async fn run_job(&self, run: PreparedRun) {
        let result = self.execute(&run).await;
        self.settle(&run, result).await;
    }

    /// Spawn the encoder and stream its output until exit or termination
    async fn execute(&self, run: &PreparedRun) -> Result<RunOutcome, RunError> {
        let input_size = tokio::fs::metadata(&run.input_path).await?.len();
        self.with_current(run.id, |job, _| job.input_size_bytes = input_size)
            .await;

        remove_if_exists(&run.temp_output_path).await;

        let params = EncodeParams {
            input_path: run.input_path.clone(),
            temp_output_path: run.temp_output_path.clone(),
            preset_path: run.preset_path.clone(),
        };
        let mut process = EncoderProcess::spawn(&self.shared.config.encoder, &params)?;
        let pid = process.pid();
        {
            let mut state = self.shared.state.write().await;
            state.encoder_pid = pid;
            state.run.log.push(
                LogKind::Info,
                format!("Encoder started (pid {})", pid.unwrap_or_default()),
            );
        }

        let _sampler = self.spawn_size_sampler(run.id, run.temp_output_path.clone());
        let mut control = self.shared.control.subscribe();
        let mut streaming = true;

        let status = loop {
            let signal = *control.borrow_and_update();
            if let Control::Stop { job, kind } = signal {
                if job == run.id {
                    if let Err(e) = process
                        .terminate(self.shared.config.encoder.grace_period)
                        .await
                    {
                        warn!(job_id = run.id, error = %e, "Failed to terminate encoder");
                    }
                    return Ok(RunOutcome::Terminated(kind));
                }
            }
            if signal == Control::Pause {
                let _ = control.changed().await;
                continue;
            }

            if streaming {
                tokio::select! {
                    biased;
                    _ = control.changed() => {}
                    line = process.next_line() => match line {
                        Some(line) => self.ingest_line(run.id, &line).await,
                        None => streaming = false,
                    },
                }
            } else {
                tokio::select! {
                    biased;
                    _ = control.changed() => {}
                    status = process.wait() => break status?,
                }
            }
        };

        check_exit(status)?;
        Ok(RunOutcome::Exited)
    }

    /// Apply one encoder line to the current job
    async fn ingest_line(&self, id: JobId, line: &str) {
        let mut guard = self.shared.state.write().await;
        let state = &mut *guard;
        let Some(job) = state.queue.current_with_id(id) else {
            return;
        };

        let events = parse_line(line, &mut state.run.fps_window);
        if events.is_empty() {
            trace!(job_id = id, line, "Encoder output");
        }
        apply_events(job, &mut state.run, &events);
        state.run.log.push(LogKind::Info, line);
        state.status_message = format!("Encoding {}: {:.1}%", job.source.name, job.progress);
    }

    fn spawn_size_sampler(&self, id: JobId, path: PathBuf) -> SamplerGuard {
        let supervisor = self.clone();
        SamplerGuard(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SIZE_SAMPLE_INTERVAL);
            loop {
                ticker.tick().await;
                let size = tokio::fs::metadata(&path)
                    .await
                    .map(|m| m.len())
                    .unwrap_or(0);
                let updated = supervisor
                    .with_current(id, |job, _| job.live_output_size_bytes = size)
                    .await;
                if !updated {
                    break;
                }
            }
        }))
    }

    /// Run `f` on the current job if it still has `id`
    async fn with_current<F>(&self, id: JobId, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord, &mut RunContext),
    {
        let mut guard = self.shared.state.write().await;
        let state = &mut *guard;
        match state.queue.current_with_id(id) {
            Some(job) => {
                f(job, &mut state.run);
                true
            }
            None => false,
        }
    }

    /// Move the current job into its terminal state and release it
    async fn settle(&self, run: &PreparedRun, result: Result<RunOutcome, RunError>) {
        let settlement = match result {
            Ok(RunOutcome::Exited) => {
                match promote_output(&run.temp_output_path, &run.final_output_path).await {
                    Ok(size) => Settlement::Completed(size),
                    Err(e) => Settlement::Failed(e.to_string()),
                }
            }
            Ok(RunOutcome::Terminated(kind)) => Settlement::Terminated(kind),
            Err(e) => Settlement::Failed(e.to_string()),
        };

        if !matches!(settlement, Settlement::Completed(_)) {
            remove_if_exists(&run.temp_output_path).await;
        }

        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            state.encoder_pid = None;

            if let Some(mut job) = state.queue.take_current() {
                match settlement {
                    Settlement::Completed(size) => {
                        job.final_output_size_bytes = size;
                        job.live_output_size_bytes = size;
                        job.record_progress(100.0);
                        job.metrics.reported_eta_secs = Some(0);
                        job.metrics.computed_eta_secs = Some(0);
                        job.finish(JobState::Completed);

                        state.run.log.push(
                            LogKind::Success,
                            format!(
                                "Encoding completed successfully. Output saved to {}",
                                job.output_file_name()
                            ),
                        );
                        state.status_message = format!("Completed: {}", job.source.name);
                        state.history.push(HistoryEntry::from_record(&job));
                        info!(job_id = job.id, output_bytes = size, "Job completed");
                    }
                    Settlement::Failed(reason) => {
                        job.finish(JobState::Failed(reason.clone()));

                        state
                            .run
                            .log
                            .push(LogKind::Error, format!("Encoding failed: {}", reason));
                        state.status_message = format!("Failed: {}", job.source.name);
                        state.history.push(HistoryEntry::from_record(&job));
                        warn!(job_id = job.id, error = %reason, "Job failed");
                    }
                    Settlement::Terminated(kind) => {
                        job.metrics.reported_eta_secs = None;
                        job.metrics.computed_eta_secs = None;
                        job.progress = 0.0;
                        job.finish(kind.terminal_state());

                        state
                            .run
                            .log
                            .push(LogKind::Warning, format!("Encoding {} by user", kind.verb()));
                        state.status_message = match kind {
                            Termination::Stop => "Stopped".to_string(),
                            Termination::Cancel => "Cancelled".to_string(),
                        };
                        info!(job_id = job.id, state = %job.state, "Job terminated");
                    }
                }
            } else {
                debug!(job_id = run.id, "Settled job was no longer current");
            }

            self.shared.control.send_replace(Control::Run);
        }

        self.shared.current.send_replace(None);
    }
}

/// Resolve `path` against the working directory; the encoder may not share it.
fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

/// Fold parser events into the job's metrics.
///
/// Percent only ever grows. Once the encoder has reported its own ETA, locally
/// computed estimates are ignored for the rest of the run.
pub fn apply_events(job: &mut JobRecord, run: &mut RunContext, events: &[ProgressEvent]) {
    for event in events {
        match *event {
            ProgressEvent::Frames { done, total } => {
                job.metrics.frames_done = done;
                job.metrics.frames_total = total;
            }
            ProgressEvent::Fps { current, average } => {
                job.metrics.current_fps = current;
                job.metrics.average_fps = (average * 10.0).round() / 10.0;
            }
            ProgressEvent::Percent(percent) => job.record_progress(percent),
            ProgressEvent::Eta {
                seconds,
                source: EtaSource::Reported,
            } => {
                run.reported_eta_seen = true;
                job.metrics.reported_eta_secs = Some(seconds);
                job.metrics.computed_eta_secs = None;
            }
            ProgressEvent::Eta {
                seconds,
                source: EtaSource::Computed,
            } => {
                if !run.reported_eta_seen {
                    job.metrics.computed_eta_secs = Some(seconds);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn record(name: &str) -> JobRecord {
        JobRecord::new(SourceRef::new(name, None), "fast.json", "mp4")
    }

    fn feed(job: &mut JobRecord, run: &mut RunContext, line: &str) {
        let events = parse_line(line, &mut run.fps_window);
        apply_events(job, run, &events);
    }

    #[test]
    fn test_frame_progress_metrics() {
        let mut job = record("movie.mkv");
        let mut run = RunContext::default();

        feed(&mut job, &mut run, "Encoding: frame 50 of 100, 30.0 fps");

        assert_eq!(job.progress, 50.0);
        assert_eq!(job.metrics.current_fps, 30.0);
        assert_eq!(job.metrics.frames_done, 50);
        assert_eq!(job.metrics.frames_total, 100);
        assert_eq!(job.metrics.remaining_secs(), Some(2));
    }

    #[test]
    fn test_reported_eta_stays_authoritative() {
        let mut job = record("movie.mkv");
        let mut run = RunContext::default();

        feed(&mut job, &mut run, "Encoding: task 1 of 1, 10.00 % (30.00 fps, ETA 00h01m23s)");
        assert_eq!(job.metrics.remaining_secs(), Some(83));

        // Would compute 2100 frames / 30 fps = 01:10.
        feed(&mut job, &mut run, "frame 900 of 3000, 30.0 fps");
        assert_eq!(job.metrics.remaining_secs(), Some(83));
        assert_eq!(job.metrics.computed_eta_secs, None);
    }

    #[test]
    fn test_computed_eta_without_reported() {
        let mut job = record("movie.mkv");
        let mut run = RunContext::default();

        feed(&mut job, &mut run, "frame 900 of 3000, 30.0 fps");
        assert_eq!(job.metrics.remaining_secs(), Some(70));
    }

    #[test]
    fn test_zero_fps_suppresses_computed_eta() {
        let mut job = record("movie.mkv");
        let mut run = RunContext::default();

        feed(&mut job, &mut run, "frame 10 of 100, 0.0 fps");
        assert_eq!(job.progress, 10.0);
        assert_eq!(job.metrics.remaining_secs(), None);
    }

    proptest! {
        #[test]
        fn prop_percent_never_decreases(
            frames in prop::collection::vec((0u64..5000, 1u64..5000), 1..40)
        ) {
            let mut job = record("movie.mkv");
            let mut run = RunContext::default();
            let mut last = 0.0;

            for (done, total) in frames {
                feed(&mut job, &mut run, &format!("frame {} of {}, 24.0 fps", done, total));
                prop_assert!(job.progress >= last);
                prop_assert!(job.progress <= 100.0);
                last = job.progress;
            }
        }
    }

    struct Fixture {
        _dir: TempDir,
        media: PathBuf,
        temp: PathBuf,
        output: PathBuf,
        supervisor: Supervisor,
    }

    /// Fake encoder. Arguments arrive as `-i <in> -o <temp> --preset-import-file <preset>`.
    const FAKE_ENCODER: &str = r#"
in="$2"
out="$4"
case "$in" in
  *fail*)
    echo "Encoding: frame 1 of 100, 10.0 fps"
    exit 3
    ;;
  *slow*)
    printf 'partial' > "$out"
    i=0
    while true; do
      i=$((i + 1))
      echo "Encoding: frame $i of 1000, 10.0 fps"
      sleep 0.1
    done
    ;;
  *)
    echo "Encoding: frame 50 of 100, 30.0 fps"
    sleep 0.5
    printf 'encoded' > "$out"
    echo "Encoding: frame 100 of 100, 30.0 fps"
    exit 0
    ;;
esac
"#;

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("media");
        let presets = dir.path().join("presets");
        let output = dir.path().join("output");
        let temp = dir.path().join("temp");
        for d in [&media, &presets, &output, &temp] {
            std::fs::create_dir_all(d).unwrap();
        }
        std::fs::write(presets.join("fast.json"), "{}").unwrap();
        for name in ["movie.mkv", "slow.mkv", "fail.mkv", "next.mkv"] {
            std::fs::write(media.join(name), vec![0u8; 1000]).unwrap();
        }
        let script = dir.path().join("encoder.sh");
        std::fs::write(&script, FAKE_ENCODER).unwrap();

        let supervisor = Supervisor::new(SupervisorConfig {
            media_dir: media.clone(),
            preset_dir: presets,
            output_dir: output.clone(),
            temp_dir: temp.clone(),
            encoder: EncoderSettings {
                command: vec!["sh".to_string(), script.display().to_string()],
                extra_args: Vec::new(),
                grace_period: Duration::from_secs(2),
            },
            history_limit: 20,
        });

        Fixture {
            _dir: dir,
            media,
            temp,
            output,
            supervisor,
        }
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !condition().await {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_enqueue_rejects_duplicate_source() {
        let fx = fixture();
        fx.supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "fast.json"))
            .await
            .unwrap();

        let err = fx
            .supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "fast.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Queue(QueueError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_enqueue_rejects_current_dir_alias() {
        let fx = fixture();
        fx.supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "fast.json"))
            .await
            .unwrap();

        let mut dotted = EnqueueRequest::new("movie.mkv", "fast.json");
        dotted.path = Some(PathBuf::from("./movie.mkv"));
        let err = fx.supervisor.enqueue(dotted).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Queue(QueueError::Duplicate(_))));
        assert_eq!(fx.supervisor.queue_snapshot().await.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_begin_next_resolves_absolute_paths() {
        let supervisor = Supervisor::new(SupervisorConfig {
            media_dir: PathBuf::from("media"),
            preset_dir: PathBuf::from("presets"),
            output_dir: PathBuf::from("output"),
            temp_dir: PathBuf::from("temp"),
            encoder: EncoderSettings {
                command: vec!["true".to_string()],
                extra_args: Vec::new(),
                grace_period: Duration::from_secs(2),
            },
            history_limit: 20,
        });
        supervisor
            .shared
            .state
            .write()
            .await
            .queue
            .enqueue(record("movie.mkv"))
            .unwrap();

        let run = supervisor.begin_next().await.expect("job begins");
        assert!(run.input_path.is_absolute());
        assert!(run.input_path.ends_with("media/movie.mkv"));
        assert!(run.temp_output_path.is_absolute());
        assert!(run.final_output_path.ends_with("output/movie.mp4"));
        assert!(run.preset_path.is_absolute());
    }

    #[tokio::test]
    async fn test_enqueue_validation() {
        let fx = fixture();

        let err = fx
            .supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "missing.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::PresetNotFound(_)));

        let err = fx
            .supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "../presets/fast.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::PresetNotFound(_)));

        let err = fx
            .supervisor
            .enqueue(EnqueueRequest::new("../movie.mkv", "fast.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidSource(_)));

        let err = fx
            .supervisor
            .enqueue(EnqueueRequest::new("sub/movie.mkv", "fast.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidSource(_)));

        let mut bad_format = EnqueueRequest::new("movie.mkv", "fast.json");
        bad_format.format = "mp4/../x".to_string();
        let err = fx.supervisor.enqueue(bad_format).await.unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_enqueue_records_input_size_and_waits_for_start() {
        let fx = fixture();
        let _driver = fx.supervisor.spawn();

        fx.supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "fast.json"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = fx.supervisor.queue_snapshot().await;
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.queue[0].input_size_bytes, 1000);
        assert_eq!(snapshot.status, "Idle");
    }

    #[tokio::test]
    async fn test_control_without_current_job() {
        let fx = fixture();
        assert!(matches!(fx.supervisor.pause().await, Err(SupervisorError::NoActiveJob)));
        assert!(matches!(fx.supervisor.resume().await, Err(SupervisorError::NoActiveJob)));
        assert!(matches!(fx.supervisor.stop().await, Err(SupervisorError::NoActiveJob)));
        assert!(matches!(fx.supervisor.cancel().await, Err(SupervisorError::NoActiveJob)));
        assert_eq!(fx.supervisor.start().await, StartOutcome::NothingQueued);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let fx = fixture();
        let _driver = fx.supervisor.spawn();
        let id = fx
            .supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "fast.json"))
            .await
            .unwrap();

        assert_eq!(fx.supervisor.start().await, StartOutcome::Started);

        let sup = fx.supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move {
                sup.queue_snapshot()
                    .await
                    .current
                    .map(|c| c.progress == 50.0)
                    .unwrap_or(false)
            }
        })
        .await;

        let detail = fx.supervisor.encoding_detail().await;
        assert_eq!(detail.input_file, "movie.mkv");
        assert_eq!(detail.current_fps, 30.0);
        assert_eq!(detail.eta, "00:02");
        assert_eq!(fx.supervisor.start().await, StartOutcome::AlreadyRunning);

        let sup = fx.supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move { !sup.history().await.is_empty() }
        })
        .await;

        let history = fx.supervisor.history().await;
        assert_eq!(history[0].id, id);
        assert_eq!(history[0].status, "completed");
        assert_eq!(history[0].input_size_bytes, 1000);
        assert_eq!(history[0].output_size_bytes, 7);
        assert_eq!(history[0].reduction, "99.3%");

        assert_eq!(std::fs::read(fx.output.join("movie.mp4")).unwrap(), b"encoded");
        assert_eq!(std::fs::read_dir(&fx.temp).unwrap().count(), 0);

        let snapshot = fx.supervisor.queue_snapshot().await;
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.status, "Completed: movie.mkv");

        let detail = fx.supervisor.encoding_detail().await;
        let last = detail.encoding_log.last().unwrap();
        assert_eq!(last.kind, LogKind::Success);
        assert!(fx.supervisor.encoder_pid().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_mid_run_advances_queue() {
        let fx = fixture();
        let _driver = fx.supervisor.spawn();
        let slow = fx
            .supervisor
            .enqueue(EnqueueRequest::new("slow.mkv", "fast.json"))
            .await
            .unwrap();
        let next = fx
            .supervisor
            .enqueue(EnqueueRequest::new("next.mkv", "fast.json"))
            .await
            .unwrap();
        fx.supervisor.start().await;

        let sup = fx.supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move {
                sup.queue_snapshot()
                    .await
                    .current
                    .map(|c| c.id == slow && c.progress > 0.0)
                    .unwrap_or(false)
            }
        })
        .await;

        let started = std::time::Instant::now();
        assert_eq!(fx.supervisor.stop().await.unwrap(), slow);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!fx.temp.join(format!("temp_{}_slow.mkv", slow)).exists());

        let sup = fx.supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move { !sup.history().await.is_empty() }
        })
        .await;

        let history = fx.supervisor.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, next);
        assert_eq!(history[0].status, "completed");
        assert!(!fx.output.join("slow.mp4").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pause_resume_then_cancel() {
        let fx = fixture();
        let _driver = fx.supervisor.spawn();
        let id = fx
            .supervisor
            .enqueue(EnqueueRequest::new("slow.mkv", "fast.json"))
            .await
            .unwrap();
        fx.supervisor.start().await;

        let sup = fx.supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move { sup.queue_snapshot().await.current.is_some() }
        })
        .await;

        assert_eq!(fx.supervisor.pause().await.unwrap(), id);
        assert_eq!(fx.supervisor.pause().await.unwrap(), id);
        let snapshot = fx.supervisor.queue_snapshot().await;
        assert!(snapshot.paused);
        assert_eq!(snapshot.current.as_ref().unwrap().status, "paused");

        // Output is not consumed while paused.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let frozen = fx.supervisor.encoding_detail().await.frames_processed;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fx.supervisor.encoding_detail().await.frames_processed, frozen);

        fx.supervisor.resume().await.unwrap();
        let snapshot = fx.supervisor.queue_snapshot().await;
        assert!(!snapshot.paused);
        assert_eq!(snapshot.current.as_ref().unwrap().status, "encoding");

        fx.supervisor.pause().await.unwrap();
        assert_eq!(fx.supervisor.cancel().await.unwrap(), id);

        let snapshot = fx.supervisor.queue_snapshot().await;
        assert!(snapshot.current.is_none());
        assert_eq!(snapshot.status, "Cancelled");
        assert!(fx.supervisor.history().await.is_empty());
        assert!(!fx.temp.join(format!("temp_{}_slow.mkv", id)).exists());

        let detail = fx.supervisor.encoding_detail().await;
        let last = detail.encoding_log.last().unwrap();
        assert_eq!(last.kind, LogKind::Warning);
        assert_eq!(last.message, "Encoding cancelled by user");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_fails_job() {
        let fx = fixture();
        let _driver = fx.supervisor.spawn();
        fx.supervisor
            .enqueue(EnqueueRequest::new("fail.mkv", "fast.json"))
            .await
            .unwrap();
        fx.supervisor.start().await;

        let sup = fx.supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move { !sup.history().await.is_empty() }
        })
        .await;

        let entry = &fx.supervisor.history().await[0];
        assert_eq!(entry.status, "failed");
        assert_eq!(entry.error.as_deref(), Some("Encoder exited with code 3"));
        assert_eq!(fx.supervisor.status_message().await, "Failed: fail.mkv");
        assert_eq!(std::fs::read_dir(&fx.temp).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_input_fails_and_next_job_still_runs() {
        let fx = fixture();
        let _driver = fx.supervisor.spawn();
        fx.supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "fast.json"))
            .await
            .unwrap();
        std::fs::remove_file(fx.media.join("movie.mkv")).unwrap();
        fx.supervisor.start().await;

        let sup = fx.supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move { !sup.history().await.is_empty() }
        })
        .await;

        let entry = &fx.supervisor.history().await[0];
        assert_eq!(entry.status, "failed");
        assert!(entry.error.as_deref().unwrap().starts_with("IO error"));
        assert!(fx.supervisor.queue_snapshot().await.current.is_none());
    }

    #[tokio::test]
    async fn test_launch_failure_fails_job() {
        let fx = fixture();
        let mut config = fx.supervisor.config().clone();
        config.encoder.command = vec!["/nonexistent/encoder-binary".to_string()];
        let supervisor = Supervisor::new(config);
        let _driver = supervisor.spawn();

        supervisor
            .enqueue(EnqueueRequest::new("movie.mkv", "fast.json"))
            .await
            .unwrap();
        supervisor.start().await;

        let sup = supervisor.clone();
        wait_until(|| {
            let sup = sup.clone();
            async move { !sup.history().await.is_empty() }
        })
        .await;

        let entry = &supervisor.history().await[0];
        assert_eq!(entry.status, "failed");
        assert!(entry
            .error
            .as_deref()
            .unwrap()
            .contains("Failed to launch encoder"));
    }
}
