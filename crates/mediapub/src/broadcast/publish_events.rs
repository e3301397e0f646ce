//! Publish event broadcaster for real-time publish status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Job, JobFailure, JobType, PublishJob};

/// What happened to a publish job or one of its jobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PublishEventKind {
    Queued,
    JobQueued,
    JobSucceeded,
    JobFailed,
    JobRetrying,
    Finished,
    Aborted,
    Cancelled,
}

impl std::fmt::Display for PublishEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishEventKind::Queued => write!(f, "Queued"),
            PublishEventKind::JobQueued => write!(f, "Job queued"),
            PublishEventKind::JobSucceeded => write!(f, "Job succeeded"),
            PublishEventKind::JobFailed => write!(f, "Job failed"),
            PublishEventKind::JobRetrying => write!(f, "Job retrying"),
            PublishEventKind::Finished => write!(f, "Finished"),
            PublishEventKind::Aborted => write!(f, "Aborted"),
            PublishEventKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishEvent {
    pub publish_job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_type: Option<JobType>,
    pub kind: PublishEventKind,
    /// Human-readable description of the event.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl PublishEvent {
    pub fn for_publish_job(
        publish_job: &PublishJob,
        kind: PublishEventKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            publish_job_id: publish_job.id.clone(),
            job_id: None,
            job_type: None,
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn for_job(job: &Job, kind: PublishEventKind, message: impl Into<String>) -> Self {
        Self {
            publish_job_id: job.publish_job_id.clone(),
            job_id: Some(job.id.clone()),
            job_type: Some(job.job_type),
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn queued(publish_job: &PublishJob) -> Self {
        Self::for_publish_job(
            publish_job,
            PublishEventKind::Queued,
            format!("Publishing to {}", publish_job.site_keys.join(", ")),
        )
    }

    pub fn job_queued(job: &Job) -> Self {
        Self::for_job(job, PublishEventKind::JobQueued, format!("{} queued", job))
    }

    pub fn job_succeeded(job: &Job) -> Self {
        let message = match &job.result {
            Some(result) => format!("{} produced {}", job, result),
            None => format!("{} succeeded", job),
        };
        Self::for_job(job, PublishEventKind::JobSucceeded, message)
    }

    pub fn job_failed(job: &Job, failure: &JobFailure) -> Self {
        Self::for_job(
            job,
            PublishEventKind::JobFailed,
            format!("{} failed: {}", job, failure),
        )
    }

    pub fn job_retrying(job: &Job) -> Self {
        let message = match job.queued_at {
            Some(at) => format!("{} retrying at {}", job, at.to_rfc3339()),
            None => format!("{} retrying", job),
        };
        Self::for_job(job, PublishEventKind::JobRetrying, message)
    }

    pub fn finished(publish_job: &PublishJob) -> Self {
        Self::for_publish_job(publish_job, PublishEventKind::Finished, "Publish finished")
    }

    pub fn aborted(publish_job: &PublishJob, reason: &str) -> Self {
        Self::for_publish_job(publish_job, PublishEventKind::Aborted, reason)
    }

    pub fn cancelled(publish_job: &PublishJob) -> Self {
        Self::for_publish_job(publish_job, PublishEventKind::Cancelled, "Publish cancelled")
    }
}

/// Fans publish events out to any number of subscribers.
#[derive(Clone)]
pub struct PublishEventBroadcaster {
    sender: Arc<broadcast::Sender<PublishEvent>>,
}

impl PublishEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, event: PublishEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishEvent> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PublishEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
