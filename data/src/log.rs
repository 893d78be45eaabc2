use std::path::{Path, PathBuf};
use std::{fs, io};

use crate::data_path;

const LOG_FILE: &str = "clubmigrate-current.log";

/// Opens (truncating) the run log file, either at `custom` or the default location.
pub fn file(custom: Option<&Path>) -> Result<fs::File, Error> {
    let path = match custom {
        Some(path) => ensure_parent(path.to_path_buf())?,
        None => path()?,
    };

    Ok(fs::OpenOptions::new()
        .write(true)
        .create(true)
        .append(false)
        .truncate(true)
        .open(path)?)
}

pub fn path() -> Result<PathBuf, Error> {
    ensure_parent(data_path(Some(LOG_FILE)))
}

fn ensure_parent(full_path: PathBuf) -> Result<PathBuf, Error> {
    let parent = full_path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Invalid log file path"))?;

    if !parent.as_os_str().is_empty() && !parent.exists() {
        fs::create_dir_all(parent)?;
    }

    Ok(full_path)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("Failed to set logger: {0}")]
    SetLog(log::SetLoggerError),
    #[error("Failed to parse log level: {0}")]
    ParseLevel(log::ParseLevelError),
}

impl From<log::SetLoggerError> for Error {
    fn from(err: log::SetLoggerError) -> Self {
        Error::SetLog(err)
    }
}

impl From<log::ParseLevelError> for Error {
    fn from(err: log::ParseLevelError) -> Self {
        Error::ParseLevel(err)
    }
}
