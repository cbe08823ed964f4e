//! Media library and preset listings.
//!
//! Walks the media directory into a tree for the file browser and lists the
//! preset files available to new jobs.

use crate::status::format_mb;
use serde::Serialize;
use std::path::{Component, Path};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::info;
use walkdir::{DirEntry, WalkDir};

/// Video file extensions recognised in the media tree (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mkv", ".mp4", ".avi", ".mov", ".m4v", ".ts", ".m2ts"];

/// Extension of preset files
pub const PRESET_EXTENSION: &str = "json";

/// Error type for preset uploads
#[derive(Debug, Error)]
pub enum PresetUploadError {
    #[error("Invalid preset file name '{0}'")]
    InvalidName(String),

    #[error("Only .json files allowed")]
    NotJson(String),

    #[error("Failed to save preset: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of node in the media tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One file or directory below the media directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Path relative to the media directory
    pub path: String,
    /// Nesting level, 0 for direct children of the media directory
    pub level: usize,
    pub size_bytes: u64,
    pub size_display: String,
    /// Last modified time in seconds since the Unix epoch
    pub modified: u64,
    /// Lowercase extension, `folder` for directories, `unknown` if absent
    pub extension: String,
    pub is_video: bool,
    pub children: Vec<LibraryEntry>,
}

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Build the media tree below `root`.
///
/// Hidden entries are skipped, siblings are sorted by name, and a missing root
/// yields an empty tree.
pub fn list_media_tree(root: &Path) -> Vec<LibraryEntry> {
    if !root.is_dir() {
        return Vec::new();
    }

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_hidden(entry));

    // stack[d] collects the children of the open directory at depth d.
    let mut stack: Vec<LibraryEntry> = vec![directory_node(String::new(), String::new(), 0, 0)];

    for entry in walker.filter_map(|e| e.ok()) {
        let depth = entry.depth();
        while stack.len() > depth {
            close_directory(&mut stack);
        }

        let Some(node) = entry_node(root, &entry) else {
            continue;
        };
        if node.kind == EntryKind::Directory {
            stack.push(node);
        } else if let Some(parent) = stack.last_mut() {
            parent.children.push(node);
        }
    }

    while stack.len() > 1 {
        close_directory(&mut stack);
    }
    stack.pop().map(|root| root.children).unwrap_or_default()
}

fn close_directory(stack: &mut Vec<LibraryEntry>) {
    if let Some(done) = stack.pop() {
        if let Some(parent) = stack.last_mut() {
            parent.children.push(done);
        }
    }
}

fn directory_node(name: String, path: String, level: usize, modified: u64) -> LibraryEntry {
    LibraryEntry {
        name,
        kind: EntryKind::Directory,
        path,
        level,
        size_bytes: 0,
        size_display: "-".to_string(),
        modified,
        extension: "folder".to_string(),
        is_video: false,
        children: Vec::new(),
    }
}

fn entry_node(root: &Path, entry: &DirEntry) -> Option<LibraryEntry> {
    let metadata = entry.metadata().ok()?;
    let name = entry.file_name().to_string_lossy().into_owned();
    let path = entry
        .path()
        .strip_prefix(root)
        .unwrap_or(entry.path())
        .display()
        .to_string();
    let level = entry.depth().saturating_sub(1);
    let modified = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    if metadata.is_dir() {
        return Some(directory_node(name, path, level, modified));
    }
    if !metadata.is_file() {
        return None;
    }

    let extension = entry
        .path()
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .filter(|ext| !ext.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    Some(LibraryEntry {
        name,
        kind: EntryKind::File,
        path,
        level,
        size_bytes: metadata.len(),
        size_display: format_mb(metadata.len()),
        modified,
        extension,
        is_video: is_video_file(entry.path()),
        children: Vec::new(),
    })
}

/// Preset file names in `dir`, sorted
pub fn list_presets(dir: &Path) -> Vec<String> {
    let mut presets: Vec<String> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| has_preset_extension(e.path()))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    presets.sort();
    presets
}

fn has_preset_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case(PRESET_EXTENSION))
        .unwrap_or(false)
}

/// Store an uploaded preset as `dir/<file_name>`, replacing any preset of that name.
///
/// The name must be a plain `*.json` file name. Returns the stored name.
pub async fn save_preset(
    dir: &Path,
    file_name: &str,
    contents: &[u8],
) -> Result<String, PresetUploadError> {
    let name = file_name.trim();
    let mut parts = Path::new(name).components();
    let plain = matches!(
        (parts.next(), parts.next()),
        (Some(Component::Normal(_)), None)
    );
    if !plain || name.starts_with('.') {
        return Err(PresetUploadError::InvalidName(file_name.to_string()));
    }
    if !has_preset_extension(Path::new(name)) {
        return Err(PresetUploadError::NotJson(file_name.to_string()));
    }

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(dir.join(name), contents).await?;
    info!(preset = name, bytes = contents.len(), "Preset saved");
    Ok(name.to_string())
}
