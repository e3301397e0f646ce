//! Test harness for isolated controller runs.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use mediapub::model::{Job, JobFailure, PublishJob};
use mediapub::publisher::{
    GenericSitePublisher, PublisherAction, PublisherOptions, PublisherRegistry, SitePublisher,
};
use mediapub::{
    ControllerConfig, DataStore, Database, PublishController, PublishListener, Runners,
};

const WAIT: Duration = Duration::from_secs(10);

/// Terminal outcome seen by the listener.
#[derive(Debug, Clone)]
pub enum Outcome {
    Succeeded(PublishJob),
    Failed(PublishJob, String),
}

impl Outcome {
    pub fn publish_job(&self) -> &PublishJob {
        match self {
            Outcome::Succeeded(pj) | Outcome::Failed(pj, _) => pj,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded(_))
    }
}

#[derive(Default)]
pub struct RecordingListener {
    outcomes: Mutex<Vec<Outcome>>,
    changed: Condvar,
}

impl RecordingListener {
    pub fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().unwrap().clone()
    }

    pub fn outcomes_for(&self, publish_job_id: &str) -> Vec<Outcome> {
        self.outcomes()
            .into_iter()
            .filter(|o| o.publish_job().id == publish_job_id)
            .collect()
    }

    /// Blocks until `publish_job_id` has an outcome.
    pub fn wait_for(&self, publish_job_id: &str) -> Outcome {
        let deadline = Instant::now() + WAIT;
        let mut outcomes = self.outcomes.lock().unwrap();
        loop {
            if let Some(outcome) = outcomes
                .iter()
                .find(|o| o.publish_job().id == publish_job_id)
            {
                return outcome.clone();
            }
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("no outcome for publish job {}", publish_job_id));
            outcomes = self.changed.wait_timeout(outcomes, remaining).unwrap().0;
        }
    }

    /// Blocks until `count` outcomes were recorded.
    pub fn wait_for_count(&self, count: usize) -> Vec<Outcome> {
        let deadline = Instant::now() + WAIT;
        let mut outcomes = self.outcomes.lock().unwrap();
        while outcomes.len() < count {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or_else(|| panic!("only {} of {} outcomes", outcomes.len(), count));
            outcomes = self.changed.wait_timeout(outcomes, remaining).unwrap().0;
        }
        outcomes.clone()
    }

    fn record(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push(outcome);
        self.changed.notify_all();
    }
}

impl PublishListener for RecordingListener {
    fn publish_succeeded(&self, publish_job: &PublishJob) {
        self.record(Outcome::Succeeded(publish_job.clone()));
    }

    fn publish_failed(&self, publish_job: &PublishJob, reason: &str) {
        self.record(Outcome::Failed(publish_job.clone(), reason.to_string()));
    }
}

/// One callback received by a [`RecordingPublisher`].
#[derive(Debug, Clone)]
pub struct Callback {
    /// Publish job the publisher instance was started for.
    pub bound_to: String,
    /// Publish job the callback was about.
    pub publish_job_id: String,
    pub job_publish_job_id: String,
}

/// Generic publisher that records every callback it receives.
pub struct RecordingPublisher {
    inner: GenericSitePublisher,
    bound_to: Option<String>,
    log: Arc<Mutex<Vec<Callback>>>,
}

impl RecordingPublisher {
    pub fn register(registry: &mut PublisherRegistry, site_key: &str) -> Arc<Mutex<Vec<Callback>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::clone(&log);
        let name = site_key.to_string();
        registry.register(site_key, move || {
            Box::new(RecordingPublisher {
                inner: GenericSitePublisher::new(name.clone(), PublisherOptions::default()),
                bound_to: None,
                log: Arc::clone(&shared),
            })
        });
        log
    }

    fn record(&self, publish_job: &PublishJob, job: &Job) {
        self.log.lock().unwrap().push(Callback {
            bound_to: self.bound_to.clone().unwrap_or_default(),
            publish_job_id: publish_job.id.clone(),
            job_publish_job_id: job.publish_job_id.clone(),
        });
    }
}

impl SitePublisher for RecordingPublisher {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn start(&mut self, publish_job: &PublishJob) -> Vec<PublisherAction> {
        assert!(self.bound_to.is_none(), "publisher started twice");
        self.bound_to = Some(publish_job.id.clone());
        self.inner.start(publish_job)
    }

    fn job_succeeded(&mut self, publish_job: &PublishJob, job: &Job) -> Vec<PublisherAction> {
        self.record(publish_job, job);
        self.inner.job_succeeded(publish_job, job)
    }

    fn job_failed(
        &mut self,
        publish_job: &PublishJob,
        job: &Job,
        failure: &JobFailure,
    ) -> Vec<PublisherAction> {
        self.record(publish_job, job);
        self.inner.job_failed(publish_job, job, failure)
    }
}

/// Controller over an in-memory database with a temp dir for media files.
pub struct TestHarness {
    temp_dir: TempDir,
    pub store: Arc<Database>,
    pub listener: Arc<RecordingListener>,
    pub controller: PublishController,
}

impl TestHarness {
    /// Default `storymaker` registry with canned render and upload runners.
    pub fn new() -> Self {
        Self::with(
            PublisherRegistry::with_defaults(PublisherOptions::default()),
            Runners::new()
                .with_render(super::fixed("file:///out.mp4"))
                .with_upload(super::fixed("https://storymaker.example/v/1")),
        )
    }

    pub fn with(registry: PublisherRegistry, runners: Runners) -> Self {
        Self::with_store(
            Arc::new(Database::open_in_memory().expect("Failed to create test database")),
            registry,
            runners,
        )
    }

    pub fn with_store(store: Arc<Database>, registry: PublisherRegistry, runners: Runners) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let listener = Arc::new(RecordingListener::default());
        let controller = PublishController::new(
            Arc::clone(&store) as Arc<dyn DataStore>,
            registry,
            runners,
            Arc::clone(&listener) as Arc<dyn PublishListener>,
            ControllerConfig {
                poll_interval: Duration::from_millis(20),
                ..ControllerConfig::default()
            },
        )
        .expect("Failed to start controller");

        Self {
            temp_dir,
            store,
            listener,
            controller,
        }
    }

    pub fn media_dir(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    pub fn count(&self, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        self.store
            .with_conn(|conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?))
            .unwrap()
    }

    /// Polls `condition` until it holds.
    pub fn wait_until<F: Fn() -> bool>(&self, condition: F) {
        let deadline = Instant::now() + WAIT;
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}
