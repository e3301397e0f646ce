//! Site publishers decide which jobs a publish job needs and when it is done.
//!
//! A publisher never touches the store or the executors itself. Each callback
//! returns [`PublisherAction`]s that the controller applies after releasing
//! the publish job's lock.

pub mod generic;
pub mod registry;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::{Job, JobFailure, PublishJob};

pub use generic::{GenericSitePublisher, PublisherOptions};
pub use registry::{PublisherFactory, PublisherRegistry, STORYMAKER};

/// What the controller should do next for a publish job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublisherAction {
    /// Persist and queue a new job.
    Enqueue(Job),
    /// Queue a failed job again after `delay`.
    Retry { job: Job, delay: Duration },
    /// Every required job succeeded.
    Finish,
    /// Give up on the publish job.
    Abort { reason: String },
}

pub trait SitePublisher: Send {
    fn name(&self) -> &str;

    /// First-stage jobs for a new publish job.
    fn start(&mut self, publish_job: &PublishJob) -> Vec<PublisherAction>;

    fn job_succeeded(&mut self, publish_job: &PublishJob, job: &Job) -> Vec<PublisherAction>;

    /// Must answer with a retry or an abort so the publish job never stalls.
    fn job_failed(
        &mut self,
        publish_job: &PublishJob,
        job: &Job,
        failure: &JobFailure,
    ) -> Vec<PublisherAction>;
}

/// Bounded retries with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total runs allowed per job, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the run following attempt number `attempts` (1-based).
    pub fn delay_after(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        let millis = self
            .backoff_base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.backoff_max_ms);
        Duration::from_millis(millis)
    }
}
