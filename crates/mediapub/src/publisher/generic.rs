use std::collections::HashSet;

use tracing::{debug, warn};

use super::{PublisherAction, RetryPolicy, SitePublisher};
use crate::model::{Job, JobFailure, JobType, PublishJob};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublisherOptions {
    /// Spec attached to the render job, e.g. an output profile.
    pub render_spec: Option<String>,
    /// Encrypt the rendered files in place once every upload succeeded.
    pub encrypt_at_rest: bool,
    pub retry: RetryPolicy,
}

/// Render once, upload to every site key, optionally encrypt the local render.
///
/// Progress is tracked by job id, so a stray or repeated callback cannot
/// move the publish job forward twice.
pub struct GenericSitePublisher {
    name: String,
    options: PublisherOptions,
    renders_pending: HashSet<String>,
    uploads_pending: HashSet<String>,
    encrypt_pending: Option<String>,
    done: bool,
}

impl GenericSitePublisher {
    pub fn new(name: impl Into<String>, options: PublisherOptions) -> Self {
        Self {
            name: name.into(),
            options,
            renders_pending: HashSet::new(),
            uploads_pending: HashSet::new(),
            encrypt_pending: None,
            done: false,
        }
    }

    fn enqueue_uploads(&mut self, publish_job: &PublishJob) -> Vec<PublisherAction> {
        let mut seen = HashSet::new();
        publish_job
            .site_keys
            .iter()
            .filter(|site| seen.insert(site.as_str()))
            .map(|site| {
                let job = Job::new(JobType::Upload, &publish_job.id, Some(site.clone()), None);
                self.uploads_pending.insert(job.id.clone());
                PublisherAction::Enqueue(job)
            })
            .collect()
    }

    fn finish(&mut self) -> Vec<PublisherAction> {
        self.done = true;
        vec![PublisherAction::Finish]
    }
}

impl SitePublisher for GenericSitePublisher {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self, publish_job: &PublishJob) -> Vec<PublisherAction> {
        let render = Job::new(
            JobType::Render,
            &publish_job.id,
            None,
            self.options.render_spec.clone(),
        );
        self.renders_pending.insert(render.id.clone());
        vec![PublisherAction::Enqueue(render)]
    }

    fn job_succeeded(&mut self, publish_job: &PublishJob, job: &Job) -> Vec<PublisherAction> {
        if self.done {
            debug!(publisher = %self.name, job = %job, "ignoring completion after finish");
            return Vec::new();
        }

        match job.job_type {
            JobType::Render => {
                if !self.renders_pending.remove(&job.id) {
                    warn!(publisher = %self.name, job = %job, "unexpected render completion");
                    return Vec::new();
                }
                if self.renders_pending.is_empty() {
                    self.enqueue_uploads(publish_job)
                } else {
                    Vec::new()
                }
            }
            JobType::Upload => {
                if !self.uploads_pending.remove(&job.id) {
                    warn!(publisher = %self.name, job = %job, "unexpected upload completion");
                    return Vec::new();
                }
                if !self.uploads_pending.is_empty() {
                    return Vec::new();
                }
                if self.options.encrypt_at_rest {
                    let encrypt = Job::new(JobType::Encrypt, &publish_job.id, None, None);
                    self.encrypt_pending = Some(encrypt.id.clone());
                    vec![PublisherAction::Enqueue(encrypt)]
                } else {
                    self.finish()
                }
            }
            JobType::Encrypt => {
                if self.encrypt_pending.as_deref() == Some(job.id.as_str()) {
                    self.encrypt_pending = None;
                    self.finish()
                } else {
                    warn!(publisher = %self.name, job = %job, "unexpected encrypt completion");
                    Vec::new()
                }
            }
        }
    }

    fn job_failed(
        &mut self,
        _publish_job: &PublishJob,
        job: &Job,
        failure: &JobFailure,
    ) -> Vec<PublisherAction> {
        if self.done {
            return Vec::new();
        }

        if self.options.retry.should_retry(job.attempts) {
            let delay = self.options.retry.delay_after(job.attempts);
            debug!(
                publisher = %self.name,
                job = %job,
                attempts = job.attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling retry"
            );
            return vec![PublisherAction::Retry {
                job: job.clone(),
                delay,
            }];
        }

        self.done = true;
        vec![PublisherAction::Abort {
            reason: format!(
                "{} failed after {} attempt(s): {}",
                job, job.attempts, failure
            ),
        }]
    }
}
