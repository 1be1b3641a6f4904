//! Backend selection: which external speech-to-text tool handles a request.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::warn;

use super::error::TranscribeError;
use crate::paths;

/// The two installable transcription backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Native GGML CLI with GPU offload; only shipped for Apple Silicon.
    Accelerated,
    /// CTranslate2 runner inside the bundled Python runtime; works anywhere.
    Generic,
}

impl BackendKind {
    pub const fn id(self) -> &'static str {
        match self {
            BackendKind::Accelerated => "accelerated",
            BackendKind::Generic => "generic",
        }
    }

    /// Model id used when the request does not name one.
    pub const fn default_model(self) -> &'static str {
        match self {
            BackendKind::Accelerated => "base",
            BackendKind::Generic => "small",
        }
    }

    /// Whether the input must be normalized to 16 kHz mono WAV first. The
    /// CPU runner wants pre-normalized input; the native engine decodes ogg
    /// on its own.
    pub const fn needs_conversion(self) -> bool {
        matches!(self, BackendKind::Generic)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "accelerated" => Ok(BackendKind::Accelerated),
            "generic" => Ok(BackendKind::Generic),
            other => Err(format!(
                "Unknown backend: {}. Use accelerated or generic",
                other
            )),
        }
    }
}

/// A backend bound to its executable invocation and model artifact.
#[derive(Debug, Clone)]
pub struct Backend {
    pub kind: BackendKind,
    pub program: PathBuf,
    /// Arguments placed before the request-specific ones (the generic
    /// backend's interpreter takes its script as the first argument).
    pub leading_args: Vec<String>,
    pub model_path: PathBuf,
}

impl Backend {
    /// What to tell the user when `program` is missing from disk.
    pub fn install_hint(&self) -> String {
        match self.kind {
            BackendKind::Accelerated => format!(
                "The transcription engine is missing ({}). Re-run the installer.",
                self.program.display()
            ),
            BackendKind::Generic => {
                "The bundled Python runtime is missing. Re-run the installer.".to_string()
            }
        }
    }
}

/// Pick the backend for one request: explicit override, then the persisted
/// choice, then what the platform supports.
pub fn resolve(override_kind: Option<BackendKind>) -> BackendKind {
    resolve_from(override_kind, configured_kind())
}

fn resolve_from(override_kind: Option<BackendKind>, configured: Option<BackendKind>) -> BackendKind {
    override_kind.or(configured).unwrap_or_else(platform_default)
}

fn configured_kind() -> Option<BackendKind> {
    let path = paths::backend_config_path().ok()?;
    kind_from_file(&path)
}

fn kind_from_file(path: &Path) -> Option<BackendKind> {
    let line = std::fs::read_to_string(path).ok()?;
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match line.parse() {
        Ok(kind) => Some(kind),
        Err(err) => {
            // User-editable file; a typo falls through to platform detection
            // instead of failing the request.
            warn!("[backend] ignoring {}: {}", path.display(), err);
            None
        }
    }
}

/// The accelerated build is produced for Apple Silicon only.
pub fn platform_default() -> BackendKind {
    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        BackendKind::Accelerated
    } else {
        BackendKind::Generic
    }
}

/// Bind `kind` to its executable and the model artifact for `model_id`,
/// failing fast when the artifact is missing.
pub fn prepare(kind: BackendKind, model_id: Option<&str>) -> Result<Backend, TranscribeError> {
    let data = paths::data_dir()?;
    prepare_in(kind, model_id, &data)
}

fn prepare_in(
    kind: BackendKind,
    model_id: Option<&str>,
    data_dir: &Path,
) -> Result<Backend, TranscribeError> {
    let model_id = model_id.unwrap_or(kind.default_model());
    let models_dir = data_dir.join("models");

    match kind {
        BackendKind::Accelerated => {
            let model_path = models_dir.join(format!("ggml-{}.bin", model_id));
            if !model_path.is_file() {
                return Err(TranscribeError::ModelNotFound(
                    model_path.display().to_string(),
                ));
            }
            Ok(Backend {
                kind,
                program: data_dir.join("bin").join("transcribe-cli"),
                leading_args: Vec::new(),
                model_path,
            })
        }
        BackendKind::Generic => {
            let model_path = models_dir.join(model_id);
            if !model_path.is_dir() {
                return Err(TranscribeError::ModelNotFound(
                    model_path.display().to_string(),
                ));
            }
            let script = data_dir.join("transcribe.py");
            Ok(Backend {
                kind,
                program: data_dir.join("runtime").join("bin").join("python3"),
                leading_args: vec![script.to_string_lossy().into_owned()],
                model_path,
            })
        }
    }
}

/// Model ids present on disk for `kind`. Best-effort, like the rest of the
/// preflight reporting: unreadable directories read as "nothing installed".
pub fn installed_models(kind: BackendKind) -> Vec<String> {
    let Ok(dir) = paths::models_dir() else {
        return Vec::new();
    };
    installed_models_in(kind, &dir)
}

fn installed_models_in(kind: BackendKind, models_dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(entries) = std::fs::read_dir(models_dir) else {
        return names;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match kind {
            BackendKind::Accelerated => {
                if path.is_file() {
                    if let Some(id) = name
                        .strip_prefix("ggml-")
                        .and_then(|rest| rest.strip_suffix(".bin"))
                    {
                        names.push(id.to_string());
                    }
                }
            }
            BackendKind::Generic => {
                if path.is_dir() {
                    names.push(name.to_string());
                }
            }
        }
    }
    names.sort();
    names
}
