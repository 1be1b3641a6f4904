//! The single request/response operation the UI layer depends on.

use log::{info, warn};
use serde::Serialize;

use super::backend::{self, BackendKind};
use super::convert;
use super::error::TranscribeError;
use super::fetch;
use super::runner::{self, OutputMode, RunSpec};
use super::workspace::Workspace;

/// One transcription request. The backend override travels with the request,
/// so concurrent callers never interfere through shared state.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionRequest {
    pub source_url: String,
    /// Language hint forwarded to the backend (e.g. "en", "fr").
    pub language: Option<String>,
    pub backend_override: Option<BackendKind>,
    /// Model id; each backend has a default when absent.
    pub model: Option<String>,
}

/// Exactly one of the two fields is ever populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum TranscriptionOutcome {
    Text { text: String },
    Error { error: String },
}

impl TranscriptionOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            TranscriptionOutcome::Text { text } => Some(text),
            TranscriptionOutcome::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, TranscriptionOutcome::Error { .. })
    }
}

/// Run the whole pipeline for one request.
///
/// Never fails: every internal error is folded into the `error` variant as
/// one readable sentence. This is the user-facing boundary.
pub async fn transcribe(request: &TranscriptionRequest) -> TranscriptionOutcome {
    match run_pipeline(request).await {
        Ok(text) => TranscriptionOutcome::Text { text },
        Err(err) => {
            warn!("[transcribe] {}", err);
            TranscriptionOutcome::Error {
                error: err.to_string(),
            }
        }
    }
}

async fn run_pipeline(request: &TranscriptionRequest) -> Result<String, TranscribeError> {
    let workspace = Workspace::ensure()?;

    let kind = backend::resolve(request.backend_override);
    // The model check runs before the download so a missing artifact costs
    // no network traffic and no subprocess.
    let backend = backend::prepare(kind, request.model.as_deref())?;
    info!(
        "[transcribe] backend={} model={}",
        kind,
        backend.model_path.display()
    );

    let audio = fetch::fetch(&request.source_url, &workspace).await?;

    let audio = if kind.needs_conversion() {
        convert::convert(&audio).await?
    } else {
        audio
    };

    let mut args = backend.leading_args.clone();
    args.extend([
        "--audio".to_string(),
        audio.to_string_lossy().into_owned(),
        "--model".to_string(),
        backend.model_path.to_string_lossy().into_owned(),
    ]);
    if let Some(ref language) = request.language {
        args.extend(["--language".to_string(), language.clone()]);
    }

    let hint = backend.install_hint();
    runner::run(RunSpec {
        program: backend.program,
        args,
        label: "transcription backend",
        timeout: runner::DEFAULT_TIMEOUT,
        output: OutputMode::JsonEnvelope,
        not_found_hint: hint,
        // The runner owns the scratch file from here; it is deleted whatever
        // the backend does.
        cleanup: Some(audio),
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_serializes_as_a_single_field_envelope() {
        let ok = TranscriptionOutcome::Text {
            text: "bonjour".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&ok).unwrap(),
            r#"{"text":"bonjour"}"#
        );

        let err = TranscriptionOutcome::Error {
            error: "Model not found".to_string(),
        };
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            r#"{"error":"Model not found"}"#
        );
    }

    #[tokio::test]
    async fn transcribe_never_panics_and_reports_errors_in_band() {
        let request = TranscriptionRequest {
            source_url: "http://cdn.discordapp.com/a.ogg".to_string(),
            backend_override: Some(BackendKind::Accelerated),
            ..Default::default()
        };
        // Fails on the missing model or the insecure URL depending on the
        // machine; either way the failure must arrive as the error variant.
        let outcome = transcribe(&request).await;
        assert!(outcome.is_error());
        assert!(outcome.text().is_none());
        match outcome {
            TranscriptionOutcome::Error { error } => assert!(!error.is_empty()),
            TranscriptionOutcome::Text { .. } => unreachable!(),
        }
    }
}
