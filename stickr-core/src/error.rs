//! Error types shared by the registry, the install coordinator and the
//! configuration store.
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A source path was selected that the registry does not know about.
    #[error("Unknown source: {}", .0.display())]
    InvalidReference(PathBuf),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    /// An install was requested while another one is still alive.
    #[error("An install is already running")]
    AlreadyRunning,

    #[error("Timed out waiting for the install to stop")]
    CancelTimedOut,

    #[error("Install failed: {0}")]
    InstallFailed(String),

    #[error("Install cancelled")]
    InstallCancelled,

    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration Error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
