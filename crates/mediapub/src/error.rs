use std::path::PathBuf;
use thiserror::Error;

use crate::model::JobType;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("No site publisher found for site keys {site_keys:?}")]
    NoPublisherFound { site_keys: Vec<String> },

    #[error("Job execution error: {0}")]
    JobExecution(#[from] JobExecutionError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] crate::db::DatabaseError),

    #[error("Invalid state: {0}")]
    InvalidState(#[from] InvalidStateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Encryption error: {0}")]
    Encryption(#[from] crate::encryption::EncryptionError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("A publish job needs at least one site key")]
    EmptySiteKeys,

    #[error("Site key at position {index} is blank")]
    BlankSiteKey { index: usize },

    #[error("Unknown job type '{0}'")]
    UnknownJobType(String),

    #[error("Malformed site keys '{raw}': {reason}")]
    MalformedSiteKeys { raw: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidStateError {
    #[error("Job {id} is already finished")]
    JobAlreadyFinished { id: String },

    #[error("Job {id} has already failed permanently")]
    JobAlreadyFailed { id: String },

    #[error("Completion for job {id} was already processed")]
    DuplicateCompletion { id: String },

    #[error("Publish job {id} cannot finish before it is queued")]
    PublishJobNotQueued { id: String },

    #[error("Publish job {id} is already finished")]
    PublishJobAlreadyFinished { id: String },

    #[error("Publish job {id} is already bound to a site publisher")]
    PublisherAlreadyBound { id: String },

    #[error("Publisher state lock poisoned")]
    LockPoisoned,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Encryption key error: {0}")]
    EncryptionKey(String),
}

/// Failure of a render, upload or encrypt run. Never crosses a thread boundary
/// as a panic; executors turn it into a [`crate::model::JobFailure`].
#[derive(Error, Debug)]
pub enum JobExecutionError {
    #[error("Render failed: {0}")]
    Render(String),

    #[error("Upload to '{site}' failed: {message}")]
    Upload { site: String, message: String },

    #[error("Encryption failed: {0}")]
    Encrypt(#[from] crate::encryption::EncryptionError),

    #[error("Job runner panicked: {0}")]
    Panicked(String),

    #[error("Missing job context: {0}")]
    MissingContext(String),

    #[error("Runner reported error {code}: {message}")]
    Runner { code: i32, message: String },
}

impl JobExecutionError {
    /// Numeric code reported through `job_failed`.
    pub fn code(&self) -> i32 {
        match self {
            JobExecutionError::Render(_) => 1,
            JobExecutionError::Upload { .. } => 2,
            JobExecutionError::Encrypt(_) => 3,
            JobExecutionError::Panicked(_) => 4,
            JobExecutionError::MissingContext(_) => 5,
            JobExecutionError::Runner { code, .. } => *code,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn {job_type} executor: {source}")]
    SpawnFailed {
        job_type: JobType,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn completion dispatcher: {0}")]
    DispatcherSpawnFailed(#[source] std::io::Error),

    #[error("No executor configured for {0} jobs")]
    NoExecutor(JobType),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, PublishError>;
