use std::{fmt, process::ExitStatus};

use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

/// Step of [crate::assemble::MediaAssembler] that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyStage {
    Concatenate,
    Decrypt,
    Transcode,
}

impl fmt::Display for AssemblyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Concatenate => "concatenation",
            Self::Decrypt => "decryption",
            Self::Transcode => "transcode",
        })
    }
}

#[derive(Error, Debug)]
pub enum M3uaError {
    #[error("Invalid m3u8 file: {0}")]
    MalformedPlaylist(String),

    #[error("Files in m3u8 are encrypted but the key uri is missing")]
    MissingKeyUri,

    #[error("Cannot access tool {name}: {source}")]
    ToolUnavailable {
        name: String,
        #[source]
        source: which::Error,
    },

    #[error("Tool {tool} exited with {status}")]
    ToolFailed { tool: String, status: ExitStatus },

    #[error("HTTP error {status} while fetching {url}")]
    Fetch {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Failed to fetch key from {url}: {source}")]
    KeyFetchFailed {
        url: String,
        #[source]
        source: Box<M3uaError>,
    },

    #[error("Invalid {method} key: expected {expected} bytes, got {actual}")]
    InvalidKey {
        method: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid iv: expected 16 bytes, got {0}")]
    InvalidIv(usize),

    #[error("Unsupported encryption method: {0}")]
    UnsupportedMethod(String),

    #[error("Segment #{index} ({url}) failed: {source}")]
    SegmentFailed {
        index: usize,
        url: String,
        #[source]
        source: Box<M3uaError>,
    },

    #[error("Segment #{0} was not downloaded")]
    MissingSegment(usize),

    #[error("Assembly failed at {stage}: {source}")]
    AssemblyFailed {
        stage: AssemblyStage,
        #[source]
        source: Box<M3uaError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Pkcs7 unpad error")]
    UnpadError(#[from] UnpadError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl M3uaError {
    pub(crate) fn assembly(stage: AssemblyStage, source: M3uaError) -> Self {
        Self::AssemblyFailed {
            stage,
            source: Box::new(source),
        }
    }
}

pub type M3uaResult<T> = Result<T, M3uaError>;
