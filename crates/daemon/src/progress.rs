//! Encoder output parsing
//!
//! Turns single lines of encoder text output into structured progress events.
//! Every marker is optional: encoder versions differ in what they print, and a
//! line that matches nothing is simply a no-op.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;

/// Number of fps samples kept for the rolling average
pub const FPS_WINDOW_CAPACITY: usize = 60;

/// Placeholder shown when a duration is unknown
pub const UNKNOWN_CLOCK: &str = "--:--";

static FRAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)frame\s+(\d+)\s+of\s+(\d+)").unwrap());
static FPS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+\.\d+|\d+)\s*fps").unwrap());
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+\.\d+|\d+)\s*%").unwrap());

// Tried in order, first match wins.
static ETA_HMS_LETTERS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)eta\s+(\d{1,2})h(\d{1,2})m(\d{1,2})s").unwrap());
static ETA_HMS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)eta\s+(\d{1,2}):(\d{1,2}):(\d{1,2})").unwrap());
static ETA_MS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)eta\s+(\d{1,2}):(\d{1,2})").unwrap());

/// Where an ETA value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtaSource {
    /// Printed by the encoder itself; authoritative
    Reported,
    /// Derived locally from frames remaining and current fps
    Computed,
}

/// A structured observation extracted from one output line
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Frame counter ("frame N of M")
    Frames { done: u64, total: u64 },
    /// Instantaneous fps plus the rolling average after this sample
    Fps { current: f64, average: f64 },
    /// Percent complete, 0..=100
    Percent(f64),
    /// Estimated seconds remaining
    Eta { seconds: u64, source: EtaSource },
}

/// Bounded ring of recent fps samples
#[derive(Debug, Clone, PartialEq)]
pub struct FpsWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl Default for FpsWindow {
    fn default() -> Self {
        Self::with_capacity(FPS_WINDOW_CAPACITY)
    }
}

impl FpsWindow {
    /// Create an empty window holding at most `capacity` samples
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sample, evicting the oldest when full
    pub fn push(&mut self, fps: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(fps);
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Arithmetic mean of the retained samples (0.0 when empty)
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Parse one line of encoder output.
///
/// Events are emitted in a fixed order: reported ETA, fps, frames, frame-derived
/// percent and computed ETA, then the "encoding ... N %" percent marker. The only
/// state touched is `window`, which receives the fps sample if one is present.
pub fn parse_line(line: &str, window: &mut FpsWindow) -> Vec<ProgressEvent> {
    let mut events = Vec::new();

    if let Some(seconds) = parse_eta(line) {
        events.push(ProgressEvent::Eta {
            seconds,
            source: EtaSource::Reported,
        });
    }

    if let Some(fps) = capture_f64(&FPS_RE, line) {
        window.push(fps);
        events.push(ProgressEvent::Fps {
            current: fps,
            average: window.average(),
        });
    }

    if let Some((done, total)) = parse_frames(line) {
        events.push(ProgressEvent::Frames { done, total });
        if total > 0 {
            let percent = (done as f64 / total as f64 * 100.0).min(100.0);
            events.push(ProgressEvent::Percent(percent));

            if let Some(fps) = window.latest().filter(|fps| *fps > 0.0) {
                let remaining = total.saturating_sub(done) as f64 / fps;
                events.push(ProgressEvent::Eta {
                    seconds: remaining.round() as u64,
                    source: EtaSource::Computed,
                });
            }
        }
    }

    if line.to_lowercase().contains("encoding") {
        if let Some(percent) = capture_f64(&PERCENT_RE, line) {
            if percent.is_finite() {
                events.push(ProgressEvent::Percent(percent.clamp(0.0, 100.0)));
            }
        }
    }

    events
}

/// Extract an encoder-reported ETA in seconds.
///
/// Accepts `HHhMMmSSs`, `HH:MM:SS` and `MM:SS` after the word "ETA".
pub fn parse_eta(line: &str) -> Option<u64> {
    if let Some(g) =
        capture_u64s(&ETA_HMS_LETTERS_RE, line).or_else(|| capture_u64s(&ETA_HMS_RE, line))
    {
        return Some(g[0] * 3600 + g[1] * 60 + g[2]);
    }
    capture_u64s(&ETA_MS_RE, line).map(|g| g[0] * 60 + g[1])
}

fn capture_u64s(re: &Regex, line: &str) -> Option<Vec<u64>> {
    let caps = re.captures(line)?;
    caps.iter()
        .skip(1)
        .map(|m| m.and_then(|m| m.as_str().parse::<u64>().ok()))
        .collect()
}

fn parse_frames(line: &str) -> Option<(u64, u64)> {
    let caps = FRAME_RE.captures(line)?;
    let done = caps.get(1)?.as_str().parse().ok()?;
    let total = caps.get(2)?.as_str().parse().ok()?;
    Some((done, total))
}

fn capture_f64(re: &Regex, line: &str) -> Option<f64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Render seconds as `MM:SS`, or `HH:MM:SS` from one hour up
pub fn format_clock(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// [`format_clock`] with the unknown placeholder for `None`
pub fn format_optional_clock(seconds: Option<u64>) -> String {
    seconds
        .map(format_clock)
        .unwrap_or_else(|| UNKNOWN_CLOCK.to_string())
}
