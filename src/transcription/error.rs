//! Typed failures for the transcription pipeline.
//!
//! Display strings double as the user-facing message once the orchestrator
//! downgrades them, so each one is a single actionable sentence.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("Not a usable https URL: {0}")]
    InvalidUrl(String),
    #[error("{0} is not a trusted media host")]
    UntrustedHost(String),
    #[error("Gave up after {0} redirects")]
    TooManyRedirects(u32),
    #[error("Redirect response carried no Location header")]
    MissingRedirectTarget,
    #[error("Download failed with HTTP status {0}")]
    DownloadFailed(u16),
    #[error("Network error while downloading the audio: {0}")]
    Network(#[from] reqwest::Error),
    #[error("Audio conversion failed: {0}")]
    ConversionFailed(String),
    #[error("{0}")]
    ToolNotFound(String),
    #[error("Model not found: {0}. Re-run the installer to download it.")]
    ModelNotFound(String),
    #[error("{label} did not finish within {secs} seconds and was stopped")]
    Timeout { label: String, secs: u64 },
    #[error("Could not parse {label} output: {raw}")]
    OutputParse { label: String, raw: String },
    #[error("{0} produced no output")]
    EmptyOutput(String),
    #[error("Failed to launch {label}: {source}")]
    Spawn {
        label: String,
        #[source]
        source: std::io::Error,
    },
    /// The external tool reported its own failure (JSON envelope or stderr).
    #[error("{0}")]
    ToolFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
