use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PrepError {
    #[error("usage: {0}")]
    Usage(String),

    #[error("invalid container {path}: {reason}")]
    InvalidContainer { path: Utf8PathBuf, reason: String },

    #[error("failed to extract {path}: {reason}")]
    Extraction { path: Utf8PathBuf, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("dataset download failed: {0}")]
    FetchHttp(String),

    #[error("dataset endpoint returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("input {0} is missing and no dataset URL is configured")]
    MissingSource(Utf8PathBuf),

    #[error("failed to link toolchain: {0}")]
    ToolchainLink(String),
}
