//! Job execution: one [`Executor`] per job type, each running a [`JobRunner`].

pub mod executor;

pub use executor::Executor;

use crate::error::JobExecutionError;
use crate::model::{Job, JobFailure, PublishJob};

/// What a runner can see of the publish job it works for.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub publish_job: PublishJob,
    /// Results of the finished render jobs of the publish job.
    pub rendered_files: Vec<String>,
}

/// Performs one job. Returns the job result, e.g. a file path or URL.
pub trait JobRunner: Send + Sync {
    fn run(&self, job: &Job, ctx: &JobContext) -> Result<String, JobExecutionError>;
}

impl<F> JobRunner for F
where
    F: Fn(&Job, &JobContext) -> Result<String, JobExecutionError> + Send + Sync,
{
    fn run(&self, job: &Job, ctx: &JobContext) -> Result<String, JobExecutionError> {
        self(job, ctx)
    }
}

/// Outcome of a single run, sent from an executor to the controller.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Succeeded { job: Job, result: String },
    Failed { job: Job, failure: JobFailure },
}

impl JobEvent {
    pub fn job(&self) -> &Job {
        match self {
            JobEvent::Succeeded { job, .. } | JobEvent::Failed { job, .. } => job,
        }
    }
}
