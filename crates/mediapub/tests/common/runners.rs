//! Canned job runners.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Sender};

use mediapub::model::Job;
use mediapub::{JobContext, JobExecutionError, JobRunner};

/// Always succeeds with `result`.
pub fn fixed(result: &str) -> Arc<dyn JobRunner> {
    let result = result.to_string();
    Arc::new(
        move |_job: &Job, _ctx: &JobContext| -> Result<String, JobExecutionError> {
            Ok(result.clone())
        },
    )
}

/// Fails the first `failures` runs, then succeeds with `result`.
pub fn flaky(failures: u32, result: &str) -> (Arc<AtomicU32>, Arc<dyn JobRunner>) {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let result = result.to_string();
    let runner = Arc::new(
        move |_job: &Job, _ctx: &JobContext| -> Result<String, JobExecutionError> {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if run <= failures {
                Err(JobExecutionError::Render(format!("encoder crashed on run {}", run)))
            } else {
                Ok(result.clone())
            }
        },
    );
    (runs, runner)
}

/// Blocks every run until the returned sender is dropped.
pub fn gated(result: &str) -> (Sender<()>, Arc<dyn JobRunner>) {
    let (gate_tx, gate_rx) = bounded::<()>(0);
    let result = result.to_string();
    let runner = Arc::new(
        move |_job: &Job, _ctx: &JobContext| -> Result<String, JobExecutionError> {
            let _ = gate_rx.recv_timeout(Duration::from_secs(10));
            Ok(result.clone())
        },
    );
    (gate_tx, runner)
}

/// Uploads "to" a URL derived from the job's site.
pub fn site_upload() -> Arc<dyn JobRunner> {
    Arc::new(
        |job: &Job, ctx: &JobContext| -> Result<String, JobExecutionError> {
            let site = job.site.clone().ok_or_else(|| {
                JobExecutionError::MissingContext("upload job without site".to_string())
            })?;
            if ctx.rendered_files.is_empty() {
                return Err(JobExecutionError::MissingContext(
                    "nothing rendered".to_string(),
                ));
            }
            Ok(format!("https://{}.example/{}", site, ctx.publish_job.id))
        },
    )
}

/// Writes a small media file under `dir` and returns its `file://` URL.
pub fn render_to(dir: PathBuf, content: &'static [u8]) -> Arc<dyn JobRunner> {
    Arc::new(
        move |job: &Job, _ctx: &JobContext| -> Result<String, JobExecutionError> {
            let path = dir.join(format!("{}.mp4", job.publish_job_id));
            std::fs::write(&path, content)
                .map_err(|e| JobExecutionError::Render(e.to_string()))?;
            Ok(format!("file://{}", path.display()))
        },
    )
}
