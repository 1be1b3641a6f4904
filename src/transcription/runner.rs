//! Runs external tools with full output capture and a watchdog.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::task::JoinHandle;

use super::error::TranscribeError;

/// Wall-clock limit for a transcription run before the watchdog kills it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Install directories appended to PATH so package-manager tools resolve even
/// under the minimal environment a GUI launch leaves us.
#[cfg(unix)]
const EXTRA_PATH_DIRS: &[&str] = &["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"];
#[cfg(not(unix))]
const EXTRA_PATH_DIRS: &[&str] = &[];

/// How the output stream is interpreted on a clean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Stdout carries one JSON object: `{"text": …}` or `{"error": …}`.
    JsonEnvelope,
    /// Stdout is the transcript itself; trimmed, must be non-empty.
    Raw,
}

/// One external invocation, fully described up front.
#[derive(Debug)]
pub struct RunSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Short human name used in log lines and error messages.
    pub label: &'static str,
    pub timeout: Duration,
    pub output: OutputMode,
    /// Message surfaced when the executable itself is missing from disk.
    pub not_found_hint: String,
    /// Scratch file removed exactly once when the run is over, however it
    /// ends.
    pub cleanup: Option<PathBuf>,
}

/// Everything one invocation produced. `status` is `None` when the watchdog
/// killed the process.
#[derive(Debug)]
pub(crate) struct RunOutput {
    pub status: Option<ExitStatus>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub timed_out: bool,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status.map_or(false, |s| s.success())
    }

    pub fn code(&self) -> i32 {
        self.status.and_then(|s| s.code()).unwrap_or(-1)
    }
}

/// One JSON object per invocation, on stdout (success) or stderr (failure).
#[derive(Debug, Deserialize)]
struct Envelope {
    text: Option<String>,
    error: Option<String>,
}

/// Run the tool and parse its designated output stream into the transcript.
///
/// The cleanup file is deleted exactly once before this returns, on every
/// branch: success, parse failure, non-zero exit, timeout, spawn failure.
pub async fn run(spec: RunSpec) -> Result<String, TranscribeError> {
    let result = run_inner(&spec).await;
    if let Some(ref path) = spec.cleanup {
        let _ = std::fs::remove_file(path);
    }
    result
}

async fn run_inner(spec: &RunSpec) -> Result<String, TranscribeError> {
    let output = capture(
        &spec.program,
        &spec.args,
        spec.label,
        spec.timeout,
        &spec.not_found_hint,
    )
    .await?;

    if output.timed_out {
        return Err(TranscribeError::Timeout {
            label: spec.label.to_string(),
            secs: spec.timeout.as_secs(),
        });
    }
    interpret(spec, &output)
}

/// Spawn, drain both pipes, and wait, killing the process if the watchdog
/// fires first. A process killed for timeout produces no result even if it
/// was about to finish.
pub(crate) async fn capture(
    program: &Path,
    args: &[String],
    label: &str,
    timeout: Duration,
    not_found_hint: &str,
) -> Result<RunOutput, TranscribeError> {
    debug!("[run] spawning {} ({})", program.display(), label);
    let mut child = Command::new(program)
        .args(args)
        .env("PATH", extended_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| {
            if is_not_found(&err) {
                TranscribeError::ToolNotFound(not_found_hint.to_string())
            } else {
                TranscribeError::Spawn {
                    label: label.to_string(),
                    source: err,
                }
            }
        })?;

    // Both pipes are drained while we wait so a chatty tool can never fill a
    // pipe buffer and stall.
    let stdout_task = drain(child.stdout.take());
    let stderr_task = drain(child.stderr.take());

    let (status, timed_out) = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => (Some(status?), false),
        Err(_) => {
            warn!(
                "[run] {} still running after {}s, killing it",
                label,
                timeout.as_secs()
            );
            let _ = child.kill().await;
            (None, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();
    debug!(
        "[run] {} done: code={:?}, stdout {} bytes, stderr {} bytes, timed_out={}",
        label,
        status.and_then(|s| s.code()),
        stdout.len(),
        stderr.len(),
        timed_out
    );
    Ok(RunOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn drain<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

fn interpret(spec: &RunSpec, output: &RunOutput) -> Result<String, TranscribeError> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.success() {
        return match spec.output {
            OutputMode::JsonEnvelope => parse_envelope(spec.label, &stdout),
            OutputMode::Raw => {
                let text = stdout.trim();
                if text.is_empty() {
                    Err(TranscribeError::EmptyOutput(spec.label.to_string()))
                } else {
                    Ok(text.to_string())
                }
            }
        };
    }

    // A failing tool may still explain itself in the envelope; prefer that
    // message over raw stderr noise.
    if let Ok(envelope) = serde_json::from_str::<Envelope>(stderr.trim()) {
        if let Some(message) = envelope.error {
            return Err(TranscribeError::ToolFailed(message));
        }
    }
    let detail = stderr.trim();
    if detail.is_empty() {
        Err(TranscribeError::ToolFailed(format!(
            "{} exited with code {}",
            spec.label,
            output.code()
        )))
    } else {
        Err(TranscribeError::ToolFailed(format!(
            "{} failed: {}",
            spec.label, detail
        )))
    }
}

fn parse_envelope(label: &str, stdout: &str) -> Result<String, TranscribeError> {
    let envelope: Envelope = serde_json::from_str(stdout.trim()).map_err(|_| {
        TranscribeError::OutputParse {
            label: label.to_string(),
            raw: preview(stdout),
        }
    })?;
    // The tool's own error report wins, whatever the exit code said.
    if let Some(message) = envelope.error {
        return Err(TranscribeError::ToolFailed(message));
    }
    match envelope.text {
        Some(text) => Ok(text),
        None => Err(TranscribeError::OutputParse {
            label: label.to_string(),
            raw: preview(stdout),
        }),
    }
}

fn preview(raw: &str) -> String {
    raw.trim().chars().take(500).collect()
}

/// Spawn failures that mean "the executable is not on disk", across the OS
/// error shapes we see for it.
fn is_not_found(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::NotFound {
        return true;
    }
    let msg = err.to_string().to_lowercase();
    msg.contains("no such file") || msg.contains("not found")
}

fn extended_path() -> std::ffi::OsString {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let mut paths: Vec<PathBuf> = std::env::split_paths(&current).collect();
    for dir in EXTRA_PATH_DIRS {
        let dir = PathBuf::from(dir);
        if !paths.contains(&dir) {
            paths.push(dir);
        }
    }
    std::env::join_paths(paths).unwrap_or(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    fn sh(script: &str) -> RunSpec {
        RunSpec {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), script.to_string()],
            label: "test tool",
            timeout: Duration::from_secs(5),
            output: OutputMode::JsonEnvelope,
            not_found_hint: "test tool missing".to_string(),
            cleanup: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn envelope_text_is_returned_verbatim() {
        let text = run(sh(r#"echo '{"text":"hello"}'"#)).await.unwrap();
        assert_eq!(text, "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn envelope_error_wins_even_on_exit_zero() {
        let err = run(sh(r#"echo '{"error":"model exploded"}'"#)).await.unwrap_err();
        match err {
            TranscribeError::ToolFailed(msg) => assert_eq!(msg, "model exploded"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn raw_mode_trims_whitespace() {
        let mut spec = sh(r#"printf '  bonjour \n'"#);
        spec.output = OutputMode::Raw;
        assert_eq!(run(spec).await.unwrap(), "bonjour");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn raw_mode_rejects_empty_output() {
        let mut spec = sh("true");
        spec.output = OutputMode::Raw;
        let err = run(spec).await.unwrap_err();
        assert!(matches!(err, TranscribeError::EmptyOutput(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn garbage_output_is_a_parse_error_with_the_raw_text() {
        let err = run(sh("echo not-json")).await.unwrap_err();
        match err {
            TranscribeError::OutputParse { raw, .. } => assert!(raw.contains("not-json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_prefers_the_stderr_envelope() {
        let err = run(sh(r#"echo '{"error":"boom"}' 1>&2; exit 3"#)).await.unwrap_err();
        match err {
            TranscribeError::ToolFailed(msg) => assert_eq!(msg, "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_falls_back_to_raw_stderr() {
        let err = run(sh("echo broken 1>&2; exit 2")).await.unwrap_err();
        match err {
            TranscribeError::ToolFailed(msg) => {
                assert!(msg.contains("broken"), "got: {msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_nonzero_exit_reports_the_code() {
        let err = run(sh("exit 7")).await.unwrap_err();
        match err {
            TranscribeError::ToolFailed(msg) => {
                assert!(msg.contains("exited with code 7"), "got: {msg}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn watchdog_kills_a_stuck_process() {
        let mut spec = sh("sleep 30");
        spec.timeout = Duration::from_millis(200);
        let started = std::time::Instant::now();
        let err = run(spec).await.unwrap_err();
        assert!(matches!(err, TranscribeError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cleanup_file_is_deleted_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("seg.wav");
        std::fs::write(&scratch, b"pcm").unwrap();

        let mut spec = sh(r#"echo '{"text":"ok"}'"#);
        spec.cleanup = Some(scratch.clone());
        run(spec).await.unwrap();
        assert!(!scratch.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cleanup_file_is_deleted_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("seg.wav");
        std::fs::write(&scratch, b"pcm").unwrap();

        let mut spec = sh("sleep 30");
        spec.timeout = Duration::from_millis(200);
        spec.cleanup = Some(scratch.clone());
        assert!(run(spec).await.is_err());
        assert!(!scratch.exists());
    }

    #[tokio::test]
    async fn missing_executable_surfaces_the_install_hint() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("seg.wav");
        std::fs::write(&scratch, b"pcm").unwrap();

        let spec = RunSpec {
            program: PathBuf::from("vm-scribe-no-such-binary"),
            args: Vec::new(),
            label: "test tool",
            timeout: Duration::from_secs(5),
            output: OutputMode::JsonEnvelope,
            not_found_hint: "install it via your package manager".to_string(),
            cleanup: Some(scratch.clone()),
        };
        let err = run(spec).await.unwrap_err();
        match err {
            TranscribeError::ToolNotFound(hint) => {
                assert_eq!(hint, "install it via your package manager");
            }
            other => panic!("unexpected error: {other}"),
        }
        // The scratch file dies with the run even when nothing was spawned.
        assert!(!scratch.exists());
    }

    #[test]
    fn path_extension_keeps_the_existing_entries() {
        let path = extended_path();
        let current = std::env::var_os("PATH").unwrap_or_default();
        for dir in std::env::split_paths(&current) {
            assert!(std::env::split_paths(&path).any(|p| p == dir));
        }
    }
}
