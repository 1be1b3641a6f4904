pub mod paths;
pub mod transcription;

pub use transcription::{transcribe, BackendKind, TranscriptionOutcome, TranscriptionRequest};

/// Log to stderr and a file under the data dir. Stdout stays clean for the
/// result envelope. Call once at startup.
pub fn init_logger() -> Result<std::path::PathBuf, fern::InitError> {
    let log_file = paths::log_file_path()?;

    let format = |out: fern::FormatCallback<'_>,
                  message: &std::fmt::Arguments<'_>,
                  record: &log::Record| {
        out.finish(format_args!(
            "[{}][{}][{}][{:?}] {}",
            chrono::Local::now().format("%Y-%m-%d"),
            chrono::Local::now().format("%H:%M:%S"),
            record.target(),
            record.level(),
            message
        ))
    };

    fern::Dispatch::new()
        .format(format)
        .level(log::LevelFilter::Debug)
        .chain(std::io::stderr())
        .chain(fern::log_file(&log_file)?)
        .apply()?;

    Ok(log_file)
}
