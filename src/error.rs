//! Error handling for the template miner
//!
//! Errors are split between setup failures (configuration, template loading,
//! marker search) and teardown failures (persisting a mined block). The search
//! loop itself has no steady-state failure mode.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the template miner
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors without a more specific context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON configuration parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The block template could not be opened or read
    #[error("Failed to read template {}: {source}", path.display())]
    TemplateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template does not contain the nonce marker
    #[error("Marker {marker:?} not found in template")]
    MarkerNotFound { marker: String },

    /// A patch would write past the end of the template buffer
    #[error("Patch of {len} bytes at offset {offset} exceeds buffer of {buffer_len} bytes")]
    BufferOverflow {
        offset: usize,
        len: usize,
        buffer_len: usize,
    },

    /// The mined block could not be written to its destination
    #[error("Failed to persist mined block to {}: {source}", path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Target validation errors
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// Nonce encoding or range errors
    #[error("Invalid nonce: {message}")]
    Nonce { message: String },

    /// Hash primitive errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Worker errors
    #[error("Worker {worker_id} error: {message}")]
    Worker { worker_id: usize, message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a template read error
    pub fn template_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::TemplateRead {
            path: path.into(),
            source,
        }
    }

    /// Create a marker-not-found error
    pub fn marker_not_found(marker: &[u8]) -> Self {
        Self::MarkerNotFound {
            marker: String::from_utf8_lossy(marker).into_owned(),
        }
    }

    /// Create a persist error
    pub fn persist(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persist {
            path: path.into(),
            source,
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create a nonce error
    pub fn nonce(message: impl Into<String>) -> Self {
        Self::Nonce {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_id: usize, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_id,
            message: message.into(),
        }
    }

    /// Whether this error happened before any search work started
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Error::Config { .. }
                | Error::Json(_)
                | Error::Yaml(_)
                | Error::TemplateRead { .. }
                | Error::MarkerNotFound { .. }
                | Error::BufferOverflow { .. }
                | Error::Target { .. }
                | Error::Nonce { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config { .. } => "config",
            Error::TemplateRead { .. } => "template_read",
            Error::MarkerNotFound { .. } => "marker_not_found",
            Error::BufferOverflow { .. } => "buffer_overflow",
            Error::Persist { .. } => "persist",
            Error::Target { .. } => "target",
            Error::Nonce { .. } => "nonce",
            Error::Crypto { .. } => "crypto",
            Error::Worker { .. } => "worker",
        }
    }
}
