//! Error types for the cgroup backend
//!
//! Three caller-visible kinds: configuration errors (fatal, raised during
//! init or first use), unexpected I/O on previously-validated paths, and
//! malformed values read back from the kernel or /proc.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors surfaced by the cgroup backend
#[derive(Debug, Error)]
pub enum CgroupError {
    /// Discovery, permission, or hierarchy invariant violated.
    /// Always fatal to the caller; typically aborts server start.
    #[error("cgroup is not properly configured: {0}")]
    Config(String),

    /// Unexpected failure of a filesystem operation on a validated path
    #[error("can't {op} '{}': {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed decimal in a pid list or a /proc value
    #[error("invalid value '{token}' in '{}'", path.display())]
    Parse { path: PathBuf, token: String },
}

impl CgroupError {
    /// Configuration error with a formatted message
    pub fn config(msg: impl Into<String>) -> Self {
        CgroupError::Config(msg.into())
    }

    /// I/O error carrying the failed operation and path
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        CgroupError::Io {
            op,
            path: path.into(),
            source,
        }
    }

    /// Parse error carrying the offending token
    pub fn parse(path: &Path, token: impl Into<String>) -> Self {
        CgroupError::Parse {
            path: path.to_path_buf(),
            token: token.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CgroupError>;
