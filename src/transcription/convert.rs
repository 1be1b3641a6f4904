//! Normalizes downloaded audio for the native backend.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;

use super::error::TranscribeError;
use super::runner;

/// ffmpeg gets this long before the watchdog stops it.
const CONVERT_TIMEOUT: Duration = Duration::from_secs(30);

const FFMPEG_HINT: &str = "ffmpeg not found. Install it (macOS: `brew install ffmpeg`, \
     Debian/Ubuntu: `apt install ffmpeg`) and retry.";

/// Convert `input` to 16 kHz mono 16-bit WAV and return the new path.
///
/// The input file is gone by the time this returns, success or not; a partial
/// output never survives a failure.
pub async fn convert(input: &Path) -> Result<PathBuf, TranscribeError> {
    let output = derived_output(input);
    debug!("[convert] {} -> {}", input.display(), output.display());

    let args = vec![
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-ar".to_string(),
        "16000".to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-sample_fmt".to_string(),
        "s16".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ];

    let result = runner::capture(Path::new("ffmpeg"), &args, "ffmpeg", CONVERT_TIMEOUT, FFMPEG_HINT).await;
    // The source file is consumed by the conversion attempt either way.
    let _ = std::fs::remove_file(input);

    let captured = match result {
        Ok(captured) => captured,
        Err(err) => {
            let _ = std::fs::remove_file(&output);
            return Err(err);
        }
    };
    if captured.timed_out {
        let _ = std::fs::remove_file(&output);
        return Err(TranscribeError::ConversionFailed(format!(
            "ffmpeg did not finish within {} seconds",
            CONVERT_TIMEOUT.as_secs()
        )));
    }
    if !captured.success() {
        let _ = std::fs::remove_file(&output);
        let stderr = String::from_utf8_lossy(&captured.stderr);
        let detail = stderr_tail(&stderr)
            .map(str::to_string)
            .unwrap_or_else(|| format!("ffmpeg exited with code {}", captured.code()));
        return Err(TranscribeError::ConversionFailed(detail));
    }
    Ok(output)
}

/// Swap the extension for `.wav`, never returning the input path itself (the
/// encoder must not read and write the same file).
fn derived_output(input: &Path) -> PathBuf {
    let output = input.with_extension("wav");
    if output == input {
        input.with_extension("norm.wav")
    } else {
        output
    }
}

/// ffmpeg buries its complaint under a long banner; the last non-empty stderr
/// line is the useful part.
fn stderr_tail(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
}
