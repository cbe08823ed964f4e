//! Transcode queue
//!
//! Background service that runs transcoding jobs one at a time through an
//! external encoder, tracks their progress, and serves queue control and status
//! over HTTP.

pub mod daemon;
pub mod encoder;
pub mod job;
pub mod library;
pub mod metrics;
pub mod progress;
pub mod promote;
pub mod queue;
pub mod server;
pub mod startup;
pub mod status;
pub mod supervisor;

pub use transcode_queue_config as config;
pub use transcode_queue_config::Config;
pub use daemon::{Daemon, DaemonError};
pub use encoder::{build_encoder_command, EncodeParams, EncoderProcess, EncoderSettings, RunError};
pub use job::{JobId, JobRecord, JobState, LogEntry, LogKind, SourceRef, Termination};
pub use library::{list_media_tree, list_presets, save_preset, LibraryEntry, PresetUploadError};
pub use metrics::{collect_system_stats, SystemStats};
pub use progress::{format_clock, parse_line, EtaSource, FpsWindow, ProgressEvent};
pub use promote::{promote_output, PromoteError};
pub use queue::{Direction, JobQueue, QueueError};
pub use server::{create_router, run_server, ApiError, ServerError};
pub use startup::{check_encoder_available, run_startup_checks, StartupError};
pub use status::{EncodingDetail, HistoryEntry, JobView, QueueSnapshot};
pub use supervisor::{EnqueueRequest, StartOutcome, Supervisor, SupervisorConfig, SupervisorError};
