//! Encoder process control.
//!
//! Builds the encoder command line, merges stdout and stderr into one line
//! stream and terminates the process gracefully on request.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use transcode_queue_config::EncoderConfig;

/// Capacity of the merged output channel, in lines
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

const READ_CHUNK: usize = 8 * 1024;

/// Error type for a single encoder run
#[derive(Debug, Error)]
pub enum RunError {
    /// The encoder could not be started
    #[error("Failed to launch encoder '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The encoder exited unsuccessfully
    #[error("Encoder {}", describe_exit(.0))]
    Exit(Option<i32>),

    /// File operation on the input, temp or final output failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_string(),
    }
}

/// Encoder invocation settings derived from configuration
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    /// Program plus leading arguments
    pub command: Vec<String>,
    /// Arguments appended after the standard ones
    pub extra_args: Vec<String>,
    /// Wait between SIGTERM and forced kill
    pub grace_period: Duration,
}

impl EncoderSettings {
    pub fn from_config(config: &EncoderConfig) -> Self {
        Self {
            command: config.command.clone(),
            extra_args: config.extra_args.clone(),
            grace_period: config.grace_period(),
        }
    }

    /// Program name, for log and error messages
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("")
    }
}

/// Paths for one encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeParams {
    pub input_path: PathBuf,
    pub temp_output_path: PathBuf,
    pub preset_path: PathBuf,
}

/// Build the encoder command.
///
/// Layout: `<command...> -i <input> -o <temp> --preset-import-file <preset> <extra...>`
pub fn build_encoder_command(
    settings: &EncoderSettings,
    params: &EncodeParams,
) -> Result<Command, RunError> {
    let (program, leading) = settings.command.split_first().ok_or_else(|| RunError::Launch {
        program: String::new(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "encoder command is empty"),
    })?;

    let mut cmd = Command::new(program);
    cmd.args(leading);
    cmd.arg("-i").arg(&params.input_path);
    cmd.arg("-o").arg(&params.temp_output_path);
    cmd.arg("--preset-import-file").arg(&params.preset_path);
    cmd.args(&settings.extra_args);

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    Ok(cmd)
}

/// A running encoder with its merged output stream
pub struct EncoderProcess {
    child: Child,
    lines: mpsc::Receiver<String>,
    forwarders: Vec<JoinHandle<()>>,
}

impl EncoderProcess {
    /// Spawn the encoder and start forwarding its output
    pub fn spawn(settings: &EncoderSettings, params: &EncodeParams) -> Result<Self, RunError> {
        let mut cmd = build_encoder_command(settings, params)?;
        debug!(command = ?cmd.as_std(), "Spawning encoder");

        let mut child = cmd.spawn().map_err(|source| RunError::Launch {
            program: settings.program().to_string(),
            source,
        })?;

        let (tx, lines) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        let mut forwarders = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(stderr, tx)));
        }

        Ok(Self {
            child,
            lines,
            forwarders,
        })
    }

    /// Operating system process id, while running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Next line of combined output; `None` once both streams are closed
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Wait for the encoder to exit on its own
    pub async fn wait(&mut self) -> Result<ExitStatus, RunError> {
        let status = self.child.wait().await?;
        Ok(status)
    }

    /// Ask the encoder to exit, forcing it after `grace`.
    ///
    /// Pending output is discarded.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, RunError> {
        self.lines.close();

        if let Some(status) = self.child.try_wait()? {
            return Ok(status);
        }

        request_termination(&mut self.child);

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                warn!(
                    grace_secs = grace.as_secs(),
                    "Encoder ignored termination request, killing"
                );
                self.child.kill().await?;
                Ok(self.child.wait().await?)
            }
        }
    }
}

impl Drop for EncoderProcess {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.abort();
        }
    }
}

/// Map an exit status to the run outcome
pub fn check_exit(status: ExitStatus) -> Result<(), RunError> {
    if status.success() {
        Ok(())
    } else {
        Err(RunError::Exit(status.code()))
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return;
    };
    if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        debug!(pid, error = %e, "SIGTERM failed");
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Failed to stop encoder");
    }
}

/// Forward text lines from `reader` into `tx`.
///
/// Both `\n` and `\r` end a line, since encoders redraw progress with carriage
/// returns. Empty lines are skipped. Stops when the reader hits EOF or the
/// receiver is gone; while the receiver is not draining, `send` waits and the
/// pipe behind `reader` fills up.
pub async fn forward_lines<R>(mut reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Encoder output read failed");
                break;
            }
        };

        for &byte in &chunk[..n] {
            if byte == b'\n' || byte == b'\r' {
                if !flush_line(&mut pending, &tx).await {
                    return;
                }
            } else {
                pending.push(byte);
            }
        }
    }

    flush_line(&mut pending, &tx).await;
}

async fn flush_line(pending: &mut Vec<u8>, tx: &mpsc::Sender<String>) -> bool {
    if pending.is_empty() {
        return true;
    }
    let line = String::from_utf8_lossy(pending).trim_end().to_string();
    pending.clear();
    if line.is_empty() {
        return true;
    }
    tx.send(line).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn settings(command: &[&str]) -> EncoderSettings {
        EncoderSettings {
            command: command.iter().map(|s| s.to_string()).collect(),
            extra_args: vec!["--verbose".to_string()],
            grace_period: Duration::from_secs(2),
        }
    }

    fn params() -> EncodeParams {
        EncodeParams {
            input_path: PathBuf::from("/media/movie.mkv"),
            temp_output_path: PathBuf::from("/temp/temp_1_movie.mkv"),
            preset_path: PathBuf::from("/presets/fast.json"),
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .filter_map(|arg| arg.to_str().map(String::from))
            .collect()
    }

    #[test]
    fn test_command_layout() {
        let cmd = build_encoder_command(&settings(&["HandBrakeCLI"]), &params()).unwrap();

        assert_eq!(cmd.as_std().get_program(), OsStr::new("HandBrakeCLI"));
        assert_eq!(
            args_of(&cmd),
            vec![
                "-i",
                "/media/movie.mkv",
                "-o",
                "/temp/temp_1_movie.mkv",
                "--preset-import-file",
                "/presets/fast.json",
                "--verbose",
            ]
        );
    }

    #[test]
    fn test_command_keeps_wrapper_arguments() {
        let cmd =
            build_encoder_command(&settings(&["nice", "-n", "10", "HandBrakeCLI"]), &params())
                .unwrap();

        assert_eq!(cmd.as_std().get_program(), OsStr::new("nice"));
        let args = args_of(&cmd);
        assert_eq!(&args[..3], &["-n", "10", "HandBrakeCLI"]);
        assert_eq!(args[3], "-i");
    }

    #[test]
    fn test_empty_command_is_launch_error() {
        let err = build_encoder_command(&settings(&[]), &params()).unwrap_err();
        assert!(matches!(err, RunError::Launch { .. }));
    }

    #[test]
    fn test_exit_error_messages() {
        assert_eq!(RunError::Exit(Some(3)).to_string(), "Encoder exited with code 3");
        assert_eq!(
            RunError::Exit(None).to_string(),
            "Encoder was terminated by a signal"
        );
    }

    #[tokio::test]
    async fn test_forward_lines_splits_on_cr_and_lf() {
        let input: &[u8] =
            b"Encoding: task 1 of 1, 10.00 %\rEncoding: task 1 of 1, 20.00 %\r\nDone\n\nlast";
        let (tx, mut rx) = mpsc::channel(16);

        forward_lines(input, tx).await;

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![
                "Encoding: task 1 of 1, 10.00 %",
                "Encoding: task 1 of 1, 20.00 %",
                "Done",
                "last",
            ]
        );
    }

    #[tokio::test]
    async fn test_forward_lines_stops_when_receiver_dropped() {
        let input: &[u8] = b"one\ntwo\nthree\n";
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        tokio::time::timeout(Duration::from_secs(1), forward_lines(input, tx))
            .await
            .expect("forwarder should stop without a receiver");
    }

    #[tokio::test]
    async fn test_spawn_missing_program_is_launch_error() {
        let result = EncoderProcess::spawn(
            &settings(&["/nonexistent/encoder-binary"]),
            &params(),
        );
        assert!(matches!(result, Err(RunError::Launch { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_merges_stdout_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("enc.sh");
        std::fs::write(&script, "echo out\necho err >&2\nexit 0\n").unwrap();

        let mut process = EncoderProcess::spawn(
            &settings(&["sh", script.to_str().unwrap()]),
            &params(),
        )
        .unwrap();

        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);

        let status = process.wait().await.unwrap();
        assert!(check_exit(status).is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("enc.sh");
        std::fs::write(&script, "exit 3\n").unwrap();

        let mut process = EncoderProcess::spawn(
            &settings(&["sh", script.to_str().unwrap()]),
            &params(),
        )
        .unwrap();
        while process.next_line().await.is_some() {}

        let status = process.wait().await.unwrap();
        assert!(matches!(check_exit(status), Err(RunError::Exit(Some(3)))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_within_grace_period() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("enc.sh");
        std::fs::write(&script, "while true; do echo tick; sleep 0.1; done\n").unwrap();

        let mut process = EncoderProcess::spawn(
            &settings(&["sh", script.to_str().unwrap()]),
            &params(),
        )
        .unwrap();
        assert_eq!(process.next_line().await.as_deref(), Some("tick"));

        let started = std::time::Instant::now();
        let status = process.terminate(Duration::from_secs(2)).await.unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("enc.sh");
        std::fs::write(
            &script,
            "trap '' TERM\necho ready\nwhile true; do sleep 0.1; done\n",
        )
        .unwrap();

        let mut process = EncoderProcess::spawn(
            &settings(&["sh", script.to_str().unwrap()]),
            &params(),
        )
        .unwrap();
        assert_eq!(process.next_line().await.as_deref(), Some("ready"));

        let started = std::time::Instant::now();
        let status = process.terminate(Duration::from_millis(300)).await.unwrap();
        assert!(!status.success());
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
