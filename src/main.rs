use std::process::ExitCode;

use clap::Parser;
use vm_scribe::transcription::{
    installed_models, prepare, resolve, transcribe, BackendKind, TranscriptionRequest,
};

#[derive(Parser)]
#[command(
    name = "vm-scribe",
    about = "Transcribe a voice message from a trusted media URL"
)]
struct Args {
    /// https URL of the voice message to transcribe
    #[arg(long, required_unless_present = "check")]
    url: Option<String>,

    /// Language hint passed to the backend (e.g. "en", "fr")
    #[arg(long)]
    language: Option<String>,

    /// Backend to use instead of the configured/platform default
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Model id (each backend has its own default)
    #[arg(long)]
    model: Option<String>,

    /// Report backend and model availability, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(err) = vm_scribe::init_logger() {
        eprintln!("logger init failed: {}", err);
    }
    let _ = vm_scribe::paths::ensure_directories();

    if args.check {
        return run_check(args.backend, args.model.as_deref());
    }

    let request = TranscriptionRequest {
        source_url: args.url.unwrap_or_default(),
        language: args.language,
        backend_override: args.backend,
        model: args.model,
    };
    let outcome = transcribe(&request).await;

    // The envelope on stdout is the whole contract with the caller.
    match serde_json::to_string(&outcome) {
        Ok(json) => println!("{}", json),
        Err(err) => println!("{{\"error\":\"failed to serialize result: {}\"}}", err),
    }
    if outcome.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Preflight report: what would this machine transcribe with, and is it all
/// on disk?
fn run_check(override_kind: Option<BackendKind>, model: Option<&str>) -> ExitCode {
    let kind = resolve(override_kind);
    println!("backend: {}", kind);

    let models = installed_models(kind);
    if models.is_empty() {
        println!("models: none installed");
    } else {
        println!("models: {}", models.join(", "));
    }

    match prepare(kind, model) {
        Ok(backend) => {
            let state = if backend.program.exists() {
                "ok"
            } else {
                "missing"
            };
            println!("executable: {} ({})", backend.program.display(), state);
            println!("model: {}", backend.model_path.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            println!("not ready: {}", err);
            ExitCode::FAILURE
        }
    }
}
