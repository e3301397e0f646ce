//! Routes work between executors, site publishers and the listener.
//!
//! Each active publish job owns a [`PublisherSlot`] behind its own mutex.
//! Publisher callbacks run under that lock; store writes, executor starts and
//! listener calls happen after it is released.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};
use tracing::{debug, error, info, warn};

use crate::broadcast::{PublishEvent, PublishEventBroadcaster};
use crate::config::Config;
use crate::db::{DataStore, DatabaseError};
use crate::error::{InvalidStateError, PublishError, Result, WorkerError};
use crate::model::{self, Job, JobFailure, JobType, Project, PublishJob};
use crate::publisher::{PublisherAction, PublisherRegistry, SitePublisher};
use crate::worker::{Executor, JobEvent, JobRunner};

const DISPATCH_POLL: Duration = Duration::from_millis(100);

/// Receives the terminal outcome of every publish job exactly once.
pub trait PublishListener: Send + Sync {
    fn publish_succeeded(&self, publish_job: &PublishJob);

    fn publish_failed(&self, publish_job: &PublishJob, reason: &str);
}

/// Listener that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl PublishListener for LoggingListener {
    fn publish_succeeded(&self, publish_job: &PublishJob) {
        info!(publish_job = %publish_job.id, project = publish_job.project_id, "publish succeeded");
    }

    fn publish_failed(&self, publish_job: &PublishJob, reason: &str) {
        warn!(publish_job = %publish_job.id, project = publish_job.project_id, reason, "publish failed");
    }
}

/// Runner per job type. Job types without a runner get no executor.
#[derive(Clone, Default)]
pub struct Runners {
    pub render: Option<Arc<dyn JobRunner>>,
    pub upload: Option<Arc<dyn JobRunner>>,
    pub encrypt: Option<Arc<dyn JobRunner>>,
}

impl Runners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_render(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.render = Some(runner);
        self
    }

    pub fn with_upload(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.upload = Some(runner);
        self
    }

    pub fn with_encrypt(mut self, runner: Arc<dyn JobRunner>) -> Self {
        self.encrypt = Some(runner);
        self
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn JobRunner>> {
        match job_type {
            JobType::Render => self.render.clone(),
            JobType::Upload => self.upload.clone(),
            JobType::Encrypt => self.encrypt.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Longest an executor sleeps before re-checking delayed jobs.
    pub poll_interval: Duration,
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            event_capacity: 256,
        }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.executors.poll_interval(),
            ..Self::default()
        }
    }
}

/// Per publish job state guarded by one lock.
struct PublisherSlot {
    site_key: String,
    publisher: Box<dyn SitePublisher>,
    publish_job: PublishJob,
    /// Jobs whose success was already routed to the publisher.
    completed: HashSet<String>,
}

type SharedSlot = Arc<Mutex<PublisherSlot>>;

struct Inner {
    store: Arc<dyn DataStore>,
    registry: PublisherRegistry,
    slots: Mutex<HashMap<String, SharedSlot>>,
    executors: HashMap<JobType, Executor>,
    listener: Arc<dyn PublishListener>,
    events: PublishEventBroadcaster,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

/// Entry point for publishing projects.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct PublishController {
    inner: Arc<Inner>,
}

impl PublishController {
    pub fn new(
        store: Arc<dyn DataStore>,
        registry: PublisherRegistry,
        runners: Runners,
        listener: Arc<dyn PublishListener>,
        config: ControllerConfig,
    ) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();

        let executors = JobType::ALL
            .iter()
            .filter_map(|&job_type| {
                runners.get(job_type).map(|runner| {
                    let executor = Executor::new(
                        job_type,
                        Arc::clone(&store),
                        runner,
                        events_tx.clone(),
                        config.poll_interval,
                    );
                    (job_type, executor)
                })
            })
            .collect();
        drop(events_tx);

        let inner = Arc::new(Inner {
            store,
            registry,
            slots: Mutex::new(HashMap::new()),
            executors,
            listener,
            events: PublishEventBroadcaster::new(config.event_capacity),
            dispatcher: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let handle = thread::Builder::new()
            .name("mediapub-dispatcher".to_string())
            .spawn(move || dispatch(weak, events_rx))
            .map_err(WorkerError::DispatcherSpawnFailed)?;
        if let Ok(mut dispatcher) = inner.dispatcher.lock() {
            *dispatcher = Some(handle);
        }

        info!(
            executors = inner.executors.len(),
            publishers = ?inner.registry.site_keys(),
            "publish controller started"
        );

        Ok(Self { inner })
    }

    pub fn events(&self) -> &PublishEventBroadcaster {
        &self.inner.events
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.inner.store
    }

    /// Creates, persists and starts a publish job for `project`.
    ///
    /// Nothing is written if the site keys are invalid or no publisher
    /// handles any of them.
    pub fn start_publish(&self, project: &Project, site_keys: Vec<String>) -> Result<PublishJob> {
        let publish_job = PublishJob::new(project.id, site_keys)?;

        let (site_key, mut publisher) = self
            .inner
            .registry
            .resolve(&publish_job.site_keys)
            .ok_or_else(|| PublishError::NoPublisherFound {
                site_keys: publish_job.site_keys.clone(),
            })?;

        let mut jobs = Vec::new();
        let mut follow_up = Vec::new();
        for action in publisher.start(&publish_job) {
            match action {
                PublisherAction::Enqueue(job) => jobs.push(job),
                other => follow_up.push(other),
            }
        }
        for job in &jobs {
            self.executor(job.job_type)?;
        }

        // Executors may report on these jobs as soon as they are committed, so
        // the publisher is bound first.
        let (mut publish_job, jobs) = publish_job.queued_with(&jobs);
        let slot = PublisherSlot {
            site_key: site_key.clone(),
            publisher,
            publish_job: publish_job.clone(),
            completed: HashSet::new(),
        };
        {
            let mut slots = self.slots()?;
            if slots.contains_key(&publish_job.id) {
                return Err(InvalidStateError::PublisherAlreadyBound {
                    id: publish_job.id.clone(),
                }
                .into());
            }
            slots.insert(publish_job.id.clone(), Arc::new(Mutex::new(slot)));
        }

        if let Err(e) = self.inner.store.queue_publish_job(&publish_job, &jobs) {
            if let Ok(mut slots) = self.inner.slots.lock() {
                slots.remove(&publish_job.id);
            }
            return Err(e.into());
        }

        if self.slot(&publish_job.id)?.is_none() {
            // Cancelled while queueing. The commit may have cleared aborted_at.
            publish_job.set_aborted_at_now();
            self.inner.store.save_publish_job(&publish_job)?;
            return Ok(publish_job);
        }

        info!(
            publish_job = %publish_job.id,
            project = project.id,
            title = %project.title,
            publisher = %site_key,
            jobs = jobs.len(),
            "publish job queued"
        );
        self.inner.events.send(PublishEvent::queued(&publish_job));
        for job in &jobs {
            self.inner.events.send(PublishEvent::job_queued(job));
        }

        for executor in self.inner.executors.values() {
            executor.start()?;
        }

        self.apply(&publish_job.id, follow_up)?;
        Ok(publish_job)
    }

    /// Queues `job` now, persists it and wakes its executor.
    pub fn enqueue_job(&self, mut job: Job) -> Result<Job> {
        let executor = self.executor(job.job_type)?;
        job.enqueue_now();
        self.inner.store.save_job(&job)?;
        debug!(job = %job, "job queued");
        self.inner.events.send(PublishEvent::job_queued(&job));
        executor.start()?;
        Ok(job)
    }

    /// Records a successful run and lets the publisher decide what follows.
    pub fn job_succeeded(&self, mut job: Job, result: String) -> Result<()> {
        job.mark_succeeded(result)?;

        let Some(slot) = self.slot(&job.publish_job_id)? else {
            self.inner.store.save_job(&job)?;
            info!(job = %job, "completion for inactive publish job recorded");
            return Ok(());
        };

        let (publish_job_id, actions) = {
            let mut slot = lock_slot(&slot)?;
            if !slot.completed.insert(job.id.clone()) {
                return Err(InvalidStateError::DuplicateCompletion { id: job.id }.into());
            }
            let PublisherSlot {
                publisher,
                publish_job,
                ..
            } = &mut *slot;
            let actions = publisher.job_succeeded(publish_job, &job);
            (publish_job.id.clone(), actions)
        };

        self.persist_or_abort(&publish_job_id, self.inner.store.save_job(&job))?;
        debug!(job = %job, "job succeeded");
        self.inner.events.send(PublishEvent::job_succeeded(&job));

        self.apply(&publish_job_id, actions)
    }

    /// Records a failed run. The publisher answers with a retry or an abort.
    pub fn job_failed(&self, mut job: Job, failure: JobFailure) -> Result<()> {
        job.mark_failed(failure.code, failure.message.clone())?;

        let Some(slot) = self.slot(&job.publish_job_id)? else {
            job.mark_abandoned()?;
            self.inner.store.save_job(&job)?;
            info!(job = %job, failure = %failure, "failure for inactive publish job recorded");
            return Ok(());
        };

        let (publish_job_id, actions) = {
            let mut slot = lock_slot(&slot)?;
            if slot.completed.contains(&job.id) {
                return Err(InvalidStateError::DuplicateCompletion { id: job.id }.into());
            }
            let PublisherSlot {
                publisher,
                publish_job,
                ..
            } = &mut *slot;
            let actions = publisher.job_failed(publish_job, &job, &failure);
            (publish_job.id.clone(), actions)
        };

        let retried = actions.iter().any(|action| {
            matches!(action, PublisherAction::Retry { job: retry, .. } if retry.id == job.id)
        });
        if !retried {
            job.mark_abandoned()?;
        }

        self.persist_or_abort(&publish_job_id, self.inner.store.save_job(&job))?;
        warn!(job = %job, attempts = job.attempts, failure = %failure, "job failed");
        self.inner.events.send(PublishEvent::job_failed(&job, &failure));

        self.apply(&publish_job_id, actions)
    }

    /// Reports a finished publish job to the listener.
    pub fn publish_job_succeeded(&self, publish_job: &PublishJob) {
        self.inner.listener.publish_succeeded(publish_job);
    }

    /// Stops a publish job. Jobs already running finish, but their outcomes
    /// no longer advance it. Returns `false` if it was not active.
    pub fn cancel(&self, publish_job_id: &str) -> Result<bool> {
        let Some(mut publish_job) = self.unbind(publish_job_id)? else {
            return Ok(false);
        };

        publish_job.set_aborted_at_now();
        self.inner.store.save_publish_job(&publish_job)?;
        info!(publish_job = %publish_job.id, "publish job cancelled");
        self.inner.events.send(PublishEvent::cancelled(&publish_job));
        self.inner.listener.publish_failed(&publish_job, "cancelled");
        Ok(true)
    }

    /// Ids of publish jobs that still have a bound publisher.
    pub fn active_publish_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = match self.inner.slots.lock() {
            Ok(slots) => slots.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    /// Name of the publisher bound to an active publish job.
    pub fn publisher_for(&self, publish_job_id: &str) -> Option<String> {
        let slot = self.slot(publish_job_id).ok()??;
        let slot = slot.lock().ok()?;
        Some(slot.site_key.clone())
    }

    /// Stops every executor and the completion dispatcher.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down publish controller");

        for executor in self.inner.executors.values() {
            executor.shutdown();
        }

        let handle = match self.inner.dispatcher.lock() {
            Ok(mut dispatcher) => dispatcher.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("completion dispatcher panicked");
            }
        }
    }

    fn apply(&self, publish_job_id: &str, actions: Vec<PublisherAction>) -> Result<()> {
        for action in actions {
            match action {
                PublisherAction::Enqueue(job) => {
                    if let Err(e) = self.enqueue_job(job) {
                        let reason = format!("cannot queue follow-up job: {}", e);
                        self.abort(publish_job_id, &reason)?;
                        return Err(e);
                    }
                }
                PublisherAction::Retry { mut job, delay } => {
                    let delay = chrono::Duration::from_std(delay)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    job.enqueue_at(model::now() + delay);
                    self.persist_or_abort(publish_job_id, self.inner.store.save_job(&job))?;
                    info!(job = %job, attempts = job.attempts, "job scheduled for retry");
                    self.inner.events.send(PublishEvent::job_retrying(&job));
                    self.executor(job.job_type)?.start()?;
                }
                PublisherAction::Finish => self.finish(publish_job_id)?,
                PublisherAction::Abort { reason } => self.abort(publish_job_id, &reason)?,
            }
        }
        Ok(())
    }

    fn finish(&self, publish_job_id: &str) -> Result<()> {
        let Some(publish_job) = self.unbind(publish_job_id)? else {
            return Ok(());
        };

        let mut finished = publish_job.clone();
        let saved = finished
            .set_finished_at_now()
            .map_err(PublishError::from)
            .and_then(|()| Ok(self.inner.store.save_publish_job(&finished)?));
        if let Err(e) = saved {
            let reason = format!("cannot record finished publish job: {}", e);
            self.notify_aborted(publish_job, &reason);
            return Err(e);
        }
        info!(publish_job = %finished.id, "publish job finished");
        self.inner.events.send(PublishEvent::finished(&finished));
        self.publish_job_succeeded(&finished);
        Ok(())
    }

    fn abort(&self, publish_job_id: &str, reason: &str) -> Result<()> {
        let Some(mut publish_job) = self.unbind(publish_job_id)? else {
            return Ok(());
        };

        publish_job.set_aborted_at_now();
        let saved = self.inner.store.save_publish_job(&publish_job);
        self.notify_aborted(publish_job, reason);
        saved.map_err(PublishError::from)
    }

    /// Announces an abort. The publish job must already be unbound.
    fn notify_aborted(&self, mut publish_job: PublishJob, reason: &str) {
        publish_job.set_aborted_at_now();
        warn!(publish_job = %publish_job.id, reason, "publish job aborted");
        self.inner.events.send(PublishEvent::aborted(&publish_job, reason));
        self.inner.listener.publish_failed(&publish_job, reason);
    }

    /// Aborts the publish job when a job outcome could not be stored, since
    /// the publisher has already acted on it.
    fn persist_or_abort(
        &self,
        publish_job_id: &str,
        saved: std::result::Result<(), DatabaseError>,
    ) -> Result<()> {
        let Err(e) = saved else {
            return Ok(());
        };
        let reason = format!("cannot record job outcome: {}", e);
        self.abort(publish_job_id, &reason)?;
        Err(e.into())
    }

    /// Removes the slot of a publish job. Only one caller ever gets it back,
    /// which keeps terminal notifications exactly-once.
    fn unbind(&self, publish_job_id: &str) -> Result<Option<PublishJob>> {
        let Some(slot) = self.slots()?.remove(publish_job_id) else {
            return Ok(None);
        };
        let slot = lock_slot(&slot)?;
        Ok(Some(slot.publish_job.clone()))
    }

    fn slot(&self, publish_job_id: &str) -> Result<Option<SharedSlot>> {
        Ok(self.slots()?.get(publish_job_id).cloned())
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<String, SharedSlot>>> {
        self.inner
            .slots
            .lock()
            .map_err(|_| InvalidStateError::LockPoisoned.into())
    }

    fn executor(&self, job_type: JobType) -> Result<&Executor> {
        self.inner
            .executors
            .get(&job_type)
            .ok_or_else(|| WorkerError::NoExecutor(job_type).into())
    }

    fn handle_event(&self, event: JobEvent) {
        let job_id = event.job().id.clone();
        let outcome = match event {
            JobEvent::Succeeded { job, result } => self.job_succeeded(job, result),
            JobEvent::Failed { job, failure } => self.job_failed(job, failure),
        };
        if let Err(e) = outcome {
            error!(job = %job_id, error = %e, "failed to process job outcome");
        }
    }
}

fn lock_slot(slot: &SharedSlot) -> Result<MutexGuard<'_, PublisherSlot>> {
    slot.lock()
        .map_err(|_| InvalidStateError::LockPoisoned.into())
}

fn dispatch(inner: Weak<Inner>, events: Receiver<JobEvent>) {
    debug!("completion dispatcher started");

    loop {
        match events.recv_timeout(DISPATCH_POLL) {
            Ok(event) => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                PublishController { inner }.handle_event(event);
            }
            Err(RecvTimeoutError::Timeout) => match inner.upgrade() {
                Some(inner) if !inner.shutdown.load(Ordering::SeqCst) => continue,
                _ => break,
            },
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    debug!("completion dispatcher stopped");
}
