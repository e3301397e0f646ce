use std::path::PathBuf;

use super::EncryptionService;
use crate::error::JobExecutionError;
use crate::model::Job;
use crate::worker::{JobContext, JobRunner};

/// Executes encrypt jobs by encrypting every rendered file of the publish job.
pub struct EncryptRunner {
    service: EncryptionService,
}

impl EncryptRunner {
    pub fn new(service: EncryptionService) -> Self {
        Self { service }
    }
}

impl JobRunner for EncryptRunner {
    fn run(&self, job: &Job, ctx: &JobContext) -> Result<String, JobExecutionError> {
        if ctx.rendered_files.is_empty() {
            return Err(JobExecutionError::MissingContext(format!(
                "no rendered files for publish job {}",
                job.publish_job_id
            )));
        }

        let mut encrypted = Vec::with_capacity(ctx.rendered_files.len());
        for file in &ctx.rendered_files {
            let path = local_path(file);
            self.service.encrypt(&path)?;
            encrypted.push(path.display().to_string());
        }

        Ok(encrypted.join("\n"))
    }
}

/// Render results are plain paths or `file://` URLs.
pub(crate) fn local_path(result: &str) -> PathBuf {
    PathBuf::from(result.strip_prefix("file://").unwrap_or(result))
}
