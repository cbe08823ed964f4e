//! System metrics for the transcode queue
//!
//! Samples host CPU, memory and disk usage plus the CPU and memory of the
//! running encoder process.

use crate::job::current_timestamp_ms;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::{Disks, Pid, System, MINIMUM_CPU_UPDATE_INTERVAL};
use tracing::debug;

/// Snapshot of host and encoder resource usage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStats {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    /// Usage of the volume holding the output directory
    pub disk_percent: f32,
    pub load_avg_1: f32,
    pub load_avg_5: f32,
    pub load_avg_15: f32,
    /// Encoder CPU usage, 0 when idle
    pub process_cpu_percent: f32,
    /// Encoder resident memory in MB, 0 when idle
    pub process_ram_mb: f64,
    /// Wall-clock time of the sample, `HH:MM:SS` UTC
    pub timestamp: String,
    pub timestamp_unix_ms: i64,
}

impl Default for SystemStats {
    fn default() -> Self {
        Self {
            cpu_percent: 0.0,
            ram_percent: 0.0,
            disk_percent: 0.0,
            load_avg_1: 0.0,
            load_avg_5: 0.0,
            load_avg_15: 0.0,
            process_cpu_percent: 0.0,
            process_ram_mb: 0.0,
            timestamp: format_time_of_day(0),
            timestamp_unix_ms: 0,
        }
    }
}

/// Collect a snapshot off the async runtime.
///
/// CPU figures need two refreshes, so this takes at least
/// [`MINIMUM_CPU_UPDATE_INTERVAL`].
pub async fn collect_system_stats(encoder_pid: Option<u32>, volume_path: PathBuf) -> SystemStats {
    match tokio::task::spawn_blocking(move || sample_system_stats(encoder_pid, &volume_path)).await
    {
        Ok(stats) => stats,
        Err(e) => {
            debug!(error = %e, "System sampler task failed");
            SystemStats::default()
        }
    }
}

/// Blocking sampler behind [`collect_system_stats`]
pub fn sample_system_stats(encoder_pid: Option<u32>, volume_path: &Path) -> SystemStats {
    let mut sys = System::new_all();
    std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_all();

    let total_memory = sys.total_memory();
    let ram_percent = if total_memory > 0 {
        (sys.used_memory() as f64 / total_memory as f64 * 100.0) as f32
    } else {
        0.0
    };

    let (process_cpu_percent, process_ram_mb) = encoder_pid
        .and_then(|pid| sys.process(Pid::from_u32(pid)))
        .map(|p| (p.cpu_usage(), p.memory() as f64 / (1024.0 * 1024.0)))
        .unwrap_or((0.0, 0.0));

    let load_avg = System::load_average();
    let now = current_timestamp_ms();

    SystemStats {
        cpu_percent: sys.global_cpu_usage(),
        ram_percent,
        disk_percent: disk_usage_percent(volume_path),
        load_avg_1: load_avg.one as f32,
        load_avg_5: load_avg.five as f32,
        load_avg_15: load_avg.fifteen as f32,
        process_cpu_percent,
        process_ram_mb: (process_ram_mb * 10.0).round() / 10.0,
        timestamp: format_time_of_day(now),
        timestamp_unix_ms: now,
    }
}

/// Used space of the disk whose mount point is the longest prefix of `path`
fn disk_usage_percent(path: &Path) -> f32 {
    let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| usage_percent(disk.total_space(), disk.available_space()))
        .unwrap_or(0.0)
}

fn usage_percent(total: u64, available: u64) -> f32 {
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(available);
    (used as f64 / total as f64 * 100.0) as f32
}

/// `HH:MM:SS` of a unix timestamp in milliseconds, UTC
pub fn format_time_of_day(unix_ms: i64) -> String {
    let secs_of_day = (unix_ms / 1000).rem_euclid(86_400);
    format!(
        "{:02}:{:02}:{:02}",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}
