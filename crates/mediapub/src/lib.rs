pub mod broadcast;
pub mod config;
pub mod controller;
pub mod db;
pub mod encryption;
pub mod error;
pub mod logging;
pub mod model;
pub mod publisher;
pub mod worker;

pub use broadcast::{PublishEvent, PublishEventBroadcaster, PublishEventKind};
pub use config::{load_config, Config};
pub use controller::{ControllerConfig, LoggingListener, PublishController, PublishListener, Runners};
pub use db::{DataStore, Database, DatabaseError};
pub use encryption::{AesGcmTransform, EncryptRunner, EncryptionError, EncryptionService, FileTransform};
pub use error::{
    ConfigError, InvalidStateError, JobExecutionError, PublishError, Result, ValidationError,
    WorkerError,
};
pub use model::{Job, JobFailure, JobFilter, JobState, JobType, Project, PublishJob};
pub use publisher::{GenericSitePublisher, PublisherAction, PublisherRegistry, RetryPolicy, SitePublisher};
pub use worker::{JobContext, JobEvent, JobRunner};
