//! Startup checks for the transcode queue
//!
//! Provides preflight checks to run before the daemon starts accepting jobs:
//! - Directory layout creation (media, presets, output, temp)
//! - Encoder availability via `<command> --version`

use crate::config::{Config, PathsConfig};
use crate::job::TEMP_PREFIX;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

static VERSION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+(\.\d+)?").unwrap());

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Encoder not available: {0}")]
    EncoderUnavailable(String),

    #[error("Failed to create directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Create the four working directories if they are missing
pub fn ensure_directories(paths: &PathsConfig) -> Result<(), StartupError> {
    for dir in [
        &paths.media_dir,
        &paths.preset_dir,
        &paths.output_dir,
        &paths.temp_dir,
    ] {
        std::fs::create_dir_all(dir).map_err(|source| StartupError::Directory {
            path: dir.display().to_string(),
            source,
        })?;
    }
    Ok(())
}

/// Delete `temp_*` staging files left behind by an earlier run
pub fn remove_stale_temp_files(temp_dir: &Path) -> usize {
    let mut removed = 0;
    for entry in WalkDir::new(temp_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
    {
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(e) => warn!(
                path = %entry.path().display(),
                error = %e,
                "Failed to remove stale temp file"
            ),
        }
    }
    if removed > 0 {
        info!(removed, "Removed stale temp files");
    }
    removed
}

/// Extract the first `X.Y[.Z]` version number from `--version` output
pub fn parse_encoder_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| VERSION_RE.find(line))
        .map(|m| m.as_str().to_string())
}

/// Check that the encoder starts by running `<command...> --version`.
///
/// Returns the reported version, or `"unknown"` when the output carries none.
pub fn check_encoder_available(command: &[String]) -> Result<String, StartupError> {
    let (program, leading) = command
        .split_first()
        .ok_or_else(|| StartupError::EncoderUnavailable("encoder command is empty".to_string()))?;

    let output = Command::new(program)
        .args(leading)
        .arg("--version")
        .output()
        .map_err(|e| {
            StartupError::EncoderUnavailable(format!(
                "{} --version failed; is it installed and in PATH? Error: {}",
                program, e
            ))
        })?;

    if !output.status.success() {
        return Err(StartupError::EncoderUnavailable(format!(
            "{} --version exited with {}",
            program, output.status
        )));
    }

    // HandBrakeCLI prints its banner to stderr on some builds.
    let text = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(parse_encoder_version(&text).unwrap_or_else(|| "unknown".to_string()))
}

/// Run all startup checks
///
/// Creates the working directories, clears stale staging files, then verifies
/// that the encoder launches.
pub fn run_startup_checks(cfg: &Config) -> Result<String, StartupError> {
    ensure_directories(&cfg.paths)?;
    remove_stale_temp_files(&cfg.paths.temp_dir);
    check_encoder_available(&cfg.encoder.command)
}
