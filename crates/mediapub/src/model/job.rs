use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InvalidStateError, ValidationError};

/// Kind of work a [`Job`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Render,
    Upload,
    Encrypt,
}

impl JobType {
    pub const ALL: [JobType; 3] = [JobType::Render, JobType::Upload, JobType::Encrypt];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Render => "render",
            JobType::Upload => "upload",
            JobType::Encrypt => "encrypt",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "render" => Ok(JobType::Render),
            "upload" => Ok(JobType::Upload),
            "encrypt" => Ok(JobType::Encrypt),
            other => Err(ValidationError::UnknownJobType(other.to_string())),
        }
    }
}

/// Error reported by an executor for a single run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: i32,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&crate::error::JobExecutionError> for JobFailure {
    fn from(err: &crate::error::JobExecutionError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Lifecycle position derived from a job's timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Created but never scheduled.
    Pending,
    Queued,
    /// Claimed by an executor.
    Running,
    Succeeded,
    /// Given up on; will not be retried.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub publish_job_id: String,
    pub job_type: JobType,
    /// Destination site key, if the job targets one.
    pub site: Option<String>,
    /// Variant or quality descriptor.
    pub spec: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    /// Number of times an executor has claimed this job.
    pub attempts: u32,
    /// Output of a successful run, e.g. a rendered file path or a remote URL.
    pub result: Option<String>,
    pub last_error: Option<JobFailure>,
}

impl Job {
    /// Allocates a new, unqueued job. Nothing is persisted.
    pub fn new(
        job_type: JobType,
        publish_job_id: impl Into<String>,
        site: Option<String>,
        spec: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            publish_job_id: publish_job_id.into(),
            job_type,
            site,
            spec,
            queued_at: None,
            started_at: None,
            finished_at: None,
            failed_at: None,
            attempts: 0,
            result: None,
            last_error: None,
        }
    }

    pub fn is_type(&self, job_type: JobType) -> bool {
        self.job_type == job_type
    }

    pub fn enqueue_now(&mut self) {
        self.enqueue_at(super::now());
    }

    /// Queues the job to become claimable at `when`. Clears any previous claim
    /// so a failed run can be retried.
    pub fn enqueue_at(&mut self, when: DateTime<Utc>) {
        self.queued_at = Some(when);
        self.started_at = None;
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(super::now());
        self.attempts += 1;
    }

    pub fn mark_succeeded(&mut self, result: impl Into<String>) -> Result<(), InvalidStateError> {
        self.ensure_open()?;
        self.finished_at = Some(super::now());
        if self.queued_at.is_none() {
            self.queued_at = self.finished_at;
        }
        self.result = Some(result.into());
        Ok(())
    }

    /// Records a failed run. The job stays unfinished and can be re-enqueued.
    pub fn mark_failed(
        &mut self,
        code: i32,
        message: impl Into<String>,
    ) -> Result<(), InvalidStateError> {
        self.ensure_open()?;
        self.last_error = Some(JobFailure::new(code, message));
        Ok(())
    }

    /// Gives up on the job for good.
    pub fn mark_abandoned(&mut self) -> Result<(), InvalidStateError> {
        self.ensure_open()?;
        self.failed_at = Some(super::now());
        Ok(())
    }

    pub fn is_queued(&self) -> bool {
        self.queued_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_failed(&self) -> bool {
        self.failed_at.is_some()
    }

    pub fn state(&self) -> JobState {
        if self.finished_at.is_some() {
            JobState::Succeeded
        } else if self.failed_at.is_some() {
            JobState::Failed
        } else if self.started_at.is_some() {
            JobState::Running
        } else if self.queued_at.is_some() {
            JobState::Queued
        } else {
            JobState::Pending
        }
    }

    fn ensure_open(&self) -> Result<(), InvalidStateError> {
        if self.is_finished() {
            return Err(InvalidStateError::JobAlreadyFinished {
                id: self.id.clone(),
            });
        }
        if self.is_failed() {
            return Err(InvalidStateError::JobAlreadyFailed {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job {}", self.job_type, self.id)?;
        if let Some(site) = &self.site {
            write!(f, " for '{}'", site)?;
        }
        Ok(())
    }
}

/// Job query filter. Every field that is set must match exactly; fields are ANDed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub job_type: Option<JobType>,
    pub site: Option<String>,
    pub spec: Option<String>,
}

impl JobFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of_type(job_type: JobType) -> Self {
        Self {
            job_type: Some(job_type),
            ..Default::default()
        }
    }

    pub fn with_site(mut self, site: impl Into<String>) -> Self {
        self.site = Some(site.into());
        self
    }

    pub fn with_spec(mut self, spec: impl Into<String>) -> Self {
        self.spec = Some(spec.into());
        self
    }

    pub fn matches(&self, job: &Job) -> bool {
        self.job_type.is_none_or(|t| t == job.job_type)
            && self
                .site
                .as_deref()
                .is_none_or(|s| job.site.as_deref() == Some(s))
            && self
                .spec
                .as_deref()
                .is_none_or(|s| job.spec.as_deref() == Some(s))
    }
}
