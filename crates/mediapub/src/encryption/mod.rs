//! Encryption at rest for rendered media files.
//!
//! Files are transformed into a temp file next to the original and then
//! renamed over it, so a failed run never leaves a half-written file behind.

pub mod locks;
pub mod runner;
pub mod task;
pub mod transform;

use std::path::PathBuf;

pub use locks::{PathGuard, PathLocks};
pub use runner::EncryptRunner;
pub use task::{encrypt_in_place, EncryptionService};
pub use transform::{AesGcmTransform, FileTransform};

/// Default environment variable holding the media key.
pub const MEDIA_KEY_ENV_VAR: &str = "MEDIAPUB_MEDIA_KEY";

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{0}' is not a regular file")]
    NotAFile(PathBuf),

    #[error("Environment variable '{name}' not set")]
    KeyNotSet { name: String },

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Failed to generate random bytes: {0}")]
    Random(String),

    #[error("Transform failed: {0}")]
    Transform(String),

    #[error("Wrote {actual} bytes to '{path}', expected {expected}")]
    LengthMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Path lock poisoned")]
    LockPoisoned,
}

impl EncryptionError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| EncryptionError::Io { path, source }
    }
}
