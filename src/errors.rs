use std::{str::Utf8Error, sync::PoisonError};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ByteSourceError>;

/// Message carried by every per-chunk timeout failure.
pub const TIMEOUT_MESSAGE: &str = "Timeout reading from source.";

#[derive(Error, Debug)]
pub enum ByteSourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Path error: {0}")]
    Path(String),
    #[error("{}", TIMEOUT_MESSAGE)]
    Timeout,
    #[error("Could not acquire resource: {0}")]
    Acquire(String),
    #[error("Could not derive source from resource: {0}")]
    Transform(String),
    #[error("Could not decode text as {0}")]
    Decode(String),
    #[error("Invalid URI: {0}")]
    InvalidUri(String),
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Source has already been consumed")]
    Consumed,
    #[error("Operation was cancelled")]
    Cancelled,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ByteSourceError {
    pub fn other(message: impl std::fmt::Display) -> Self {
        Self::Other(anyhow::anyhow!(message.to_string()))
    }
}

impl From<Utf8Error> for ByteSourceError {
    fn from(_: Utf8Error) -> Self {
        Self::Decode("UTF-8".to_owned())
    }
}

impl From<url::ParseError> for ByteSourceError {
    fn from(value: url::ParseError) -> Self {
        Self::InvalidUri(value.to_string())
    }
}

impl<T> From<PoisonError<T>> for ByteSourceError {
    fn from(value: PoisonError<T>) -> Self {
        Self::Other(anyhow::anyhow!(value.to_string()))
    }
}
