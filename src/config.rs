use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    cancel::Cancellation, ByteSourceError, Result, DEFAULT_BUFFER_SIZE,
    KILOBYTE, MEGABYTE,
};

pub const CHUNK_TIMEOUT_ENV: &str = "BYTE_SOURCE_CHUNK_TIMEOUT_MS";
pub const COPY_MODE_ENV: &str = "BYTE_SOURCE_COPY_MODE";

/// How pull adapters slice what they read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadConfig {
    pub buffer_size: usize,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ReadConfig {
    pub fn small() -> Self {
        Self {
            buffer_size: 64 * KILOBYTE,
        }
    }

    pub fn large() -> Self {
        Self {
            buffer_size: 4 * MEGABYTE,
        }
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self { buffer_size }
    }
}

/// Aliasing assumption a write makes about the chunks it is given.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum CopyMode {
    /// Chunks go to the destination as they are. The producer must not
    /// touch a chunk's memory until its write has completed.
    #[default]
    ZeroCopy,
    /// Every chunk is copied before it is written.
    DefensiveCopy,
}

impl FromStr for CopyMode {
    type Err = ByteSourceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zero-copy" | "zerocopy" | "zero_copy" => Ok(CopyMode::ZeroCopy),
            "defensive-copy" | "defensivecopy" | "defensive_copy" | "copy" => {
                Ok(CopyMode::DefensiveCopy)
            }
            other => Err(ByteSourceError::InvalidArgument(format!(
                "unknown copy mode `{}`",
                other
            ))),
        }
    }
}

/// Knobs of a single write.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    /// Wall-clock limit for producing one chunk. `None` waits forever.
    pub chunk_read_timeout: Option<Duration>,
    pub cancellation: Cancellation,
    pub copy_mode: CopyMode,
}

impl WriteOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.chunk_read_timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_copy_mode(mut self, copy_mode: CopyMode) -> Self {
        self.copy_mode = copy_mode;
        self
    }

    pub fn defensive() -> Self {
        Self::default().with_copy_mode(CopyMode::DefensiveCopy)
    }

    /// Defaults, overridden by `BYTE_SOURCE_CHUNK_TIMEOUT_MS` and
    /// `BYTE_SOURCE_COPY_MODE` when they are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();

        if let Some(raw) = lookup(CHUNK_TIMEOUT_ENV) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                ByteSourceError::InvalidArgument(format!(
                    "{} must be a number of milliseconds, got `{}`",
                    CHUNK_TIMEOUT_ENV, raw
                ))
            })?;
            options.chunk_read_timeout = Some(Duration::from_millis(millis));
        }
        if let Some(raw) = lookup(COPY_MODE_ENV) {
            options.copy_mode = raw.parse()?;
        }

        log::debug!(
            "config: timeout {:?}, copy mode {:?}",
            options.chunk_read_timeout,
            options.copy_mode
        );
        Ok(options)
    }
}
