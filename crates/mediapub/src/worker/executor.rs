use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::{JobContext, JobEvent, JobRunner};
use crate::db::DataStore;
use crate::error::{JobExecutionError, WorkerError};
use crate::model::{self, Job, JobFailure, JobFilter, JobType};

/// Background worker draining queued jobs of one type.
///
/// The thread only lives while there is work: it exits once no claimable job
/// remains and is started again by the next [`Executor::start`].
pub struct Executor {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    job_type: JobType,
    store: Arc<dyn DataStore>,
    runner: Arc<dyn JobRunner>,
    events: Sender<JobEvent>,
    poll_interval: Duration,
    running: AtomicBool,
    shutdown: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Executor {
    pub fn new(
        job_type: JobType,
        store: Arc<dyn DataStore>,
        runner: Arc<dyn JobRunner>,
        events: Sender<JobEvent>,
        poll_interval: Duration,
    ) -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            shared: Arc::new(Shared {
                job_type,
                store,
                runner,
                events,
                poll_interval,
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                wake_tx,
                wake_rx,
            }),
            handle: Mutex::new(None),
        }
    }

    pub fn job_type(&self) -> JobType {
        self.shared.job_type
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Starts the worker thread, or wakes it if it is already running.
    pub fn start(&self) -> Result<(), WorkerError> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            debug!(job_type = %self.shared.job_type, "executor shut down, not starting");
            return Ok(());
        }

        if self.shared.running.swap(true, Ordering::SeqCst) {
            let _ = self.shared.wake_tx.try_send(());
            return Ok(());
        }

        let mut handle = self.handle.lock().map_err(|_| WorkerError::ChannelClosed)?;
        // A previous thread has either exited or is about to.
        if let Some(previous) = handle.take() {
            let _ = previous.join();
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("mediapub-{}", self.shared.job_type))
            .spawn(move || run_executor(shared));

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(source) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(WorkerError::SpawnFailed {
                    job_type: self.shared.job_type,
                    source,
                })
            }
        }
    }

    /// Stops claiming new jobs and waits for the current run to finish.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shared.wake_tx.try_send(());

        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(job_type = %self.shared.job_type, "executor thread panicked");
            }
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        let _ = self.shared.wake_tx.try_send(());
    }
}

fn run_executor(shared: Arc<Shared>) {
    debug!(job_type = %shared.job_type, "executor started");

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            shared.running.store(false, Ordering::SeqCst);
            break;
        }

        match shared.store.claim_next_job(shared.job_type, model::now()) {
            Ok(Some(job)) => {
                execute(&shared, job);
                continue;
            }
            Ok(None) => {}
            Err(e) => {
                // Queued jobs stay claimable for the next start().
                error!(job_type = %shared.job_type, error = %e, "failed to claim next job");
                shared.running.store(false, Ordering::SeqCst);
                break;
            }
        }

        match shared.store.next_queued_at(shared.job_type) {
            Ok(Some(due)) => {
                let wait = (due - model::now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
                    .min(shared.poll_interval);
                let _ = shared.wake_rx.recv_timeout(wait);
            }
            Ok(None) | Err(_) => {
                shared.running.store(false, Ordering::SeqCst);

                // A job queued between the claim and the store above would
                // otherwise wait for the next start().
                let pending = matches!(shared.store.next_queued_at(shared.job_type), Ok(Some(_)));
                if pending
                    && shared
                        .running
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    continue;
                }
                break;
            }
        }
    }

    debug!(job_type = %shared.job_type, "executor idle, stopping");
}

fn execute(shared: &Shared, job: Job) {
    let event = match build_context(shared.store.as_ref(), &job) {
        Ok(ctx) => {
            info!(job = %job, attempt = job.attempts, "running job");
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.runner.run(&job, &ctx)))
                .unwrap_or_else(|payload| Err(JobExecutionError::Panicked(panic_message(&*payload))));

            match outcome {
                Ok(result) => JobEvent::Succeeded { job, result },
                Err(e) => {
                    warn!(job = %job, error = %e, "job run failed");
                    JobEvent::Failed {
                        failure: JobFailure::from(&e),
                        job,
                    }
                }
            }
        }
        Err(e) => {
            warn!(job = %job, error = %e, "cannot build job context");
            JobEvent::Failed {
                failure: JobFailure::from(&e),
                job,
            }
        }
    };

    if shared.events.send(event).is_err() {
        warn!(job_type = %shared.job_type, "completion channel closed, dropping outcome");
    }
}

fn build_context(store: &dyn DataStore, job: &Job) -> Result<JobContext, JobExecutionError> {
    let publish_job = store
        .find_publish_job(&job.publish_job_id)
        .map_err(|e| JobExecutionError::MissingContext(e.to_string()))?
        .ok_or_else(|| {
            JobExecutionError::MissingContext(format!(
                "publish job {} not found",
                job.publish_job_id
            ))
        })?;

    let rendered_files = store
        .find_jobs(&publish_job.id, &JobFilter::of_type(JobType::Render))
        .map_err(|e| JobExecutionError::MissingContext(e.to_string()))?
        .into_iter()
        .filter(Job::is_finished)
        .filter_map(|render| render.result)
        .collect();

    Ok(JobContext {
        publish_job,
        rendered_files,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
