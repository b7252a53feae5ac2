use std::path::Path;

use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::EnvFilter;

use crate::infra::{config::LogConfig, error::AppError};

/// Installs the global subscriber. Without `file` logs go to stderr so
/// stdout stays free for chat output. With `file` a non-blocking writer is
/// used and the returned guard must outlive the program's logging.
pub fn init(config: &LogConfig) -> Result<Option<WorkerGuard>, AppError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let Some(path) = config.file.as_deref() else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(AppError::LoggingInit)?;
        return Ok(None);
    };

    let appender = file_appender(path)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(AppError::LoggingInit)?;

    Ok(Some(guard))
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, AppError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| AppError::InvalidLogPath {
            path: path.to_path_buf(),
        })?
        .to_string_lossy()
        .into_owned();
    let directory = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .map_err(|error| AppError::LoggingInit(Box::new(error)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_path_without_file_name_is_rejected() {
        let error = file_appender(Path::new("/")).expect_err("root has no file name");

        assert!(matches!(error, AppError::InvalidLogPath { .. }));
    }

    #[test]
    fn file_appender_creates_log_in_directory() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("wolfpack.log");

        file_appender(&path).expect("appender should build");

        assert!(path.exists());
    }
}
