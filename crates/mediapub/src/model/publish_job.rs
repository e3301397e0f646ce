use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{DataStore, DatabaseError};
use crate::error::{InvalidStateError, ValidationError};

use super::job::{Job, JobFilter, JobType};

/// Groups every job needed to publish one project to a set of sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishJob {
    pub id: String,
    pub project_id: i64,
    pub site_keys: Vec<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set when the publish job was given up on or cancelled.
    pub aborted_at: Option<DateTime<Utc>>,
}

impl PublishJob {
    /// Creates an unqueued publish job. Nothing is persisted.
    pub fn new(project_id: i64, site_keys: Vec<String>) -> Result<Self, ValidationError> {
        if site_keys.is_empty() {
            return Err(ValidationError::EmptySiteKeys);
        }
        if let Some(index) = site_keys.iter().position(|k| k.trim().is_empty()) {
            return Err(ValidationError::BlankSiteKey { index });
        }

        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id,
            site_keys,
            queued_at: None,
            finished_at: None,
            aborted_at: None,
        })
    }

    /// Inserts or updates this record.
    pub fn save(&self, store: &dyn DataStore) -> Result<(), DatabaseError> {
        store.save_publish_job(self)
    }

    /// Queues this publish job and all of `jobs` in a single transaction.
    /// On failure neither `self` nor `jobs` are modified.
    pub fn queue_with_jobs(
        &mut self,
        jobs: &mut [Job],
        store: &dyn DataStore,
    ) -> Result<(), DatabaseError> {
        let (queued, queued_jobs) = self.queued_with(jobs);

        store.queue_publish_job(&queued, &queued_jobs)?;

        *self = queued;
        jobs.clone_from_slice(&queued_jobs);
        Ok(())
    }

    /// Copies of this publish job and `jobs` queued at the same instant.
    /// Nothing is persisted.
    pub fn queued_with(&self, jobs: &[Job]) -> (PublishJob, Vec<Job>) {
        let mut queued = self.clone();
        queued.set_queued_at_now();
        let queued_at = queued.queued_at.unwrap_or_else(super::now);
        let queued_jobs = jobs
            .iter()
            .cloned()
            .map(|mut job| {
                job.publish_job_id = queued.id.clone();
                job.enqueue_at(queued_at);
                job
            })
            .collect();
        (queued, queued_jobs)
    }

    /// Jobs owned by this publish job. Each call runs a fresh query.
    pub fn jobs(&self, store: &dyn DataStore, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        store.find_jobs(&self.id, filter)
    }

    /// Results of the finished render jobs. Empty while the publish job is not
    /// finished, since renders may still be in flight.
    pub fn rendered_file_paths(&self, store: &dyn DataStore) -> Result<Vec<String>, DatabaseError> {
        if !self.is_finished() {
            return Ok(Vec::new());
        }
        Ok(self
            .jobs(store, &JobFilter::of_type(JobType::Render))?
            .into_iter()
            .filter(Job::is_finished)
            .filter_map(|job| job.result)
            .collect())
    }

    pub fn set_queued_at_now(&mut self) {
        self.queued_at = Some(super::now());
    }

    pub fn set_finished_at_now(&mut self) -> Result<(), InvalidStateError> {
        if !self.is_queued() {
            return Err(InvalidStateError::PublishJobNotQueued {
                id: self.id.clone(),
            });
        }
        if self.is_finished() {
            return Err(InvalidStateError::PublishJobAlreadyFinished {
                id: self.id.clone(),
            });
        }
        self.finished_at = Some(super::now());
        Ok(())
    }

    pub fn set_aborted_at_now(&mut self) {
        if self.aborted_at.is_none() {
            self.aborted_at = Some(super::now());
        }
    }

    pub fn is_queued(&self) -> bool {
        self.queued_at.is_some()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_requires_site_keys() {
        assert_eq!(
            PublishJob::new(1, vec![]).unwrap_err(),
            ValidationError::EmptySiteKeys
        );
        assert_eq!(
            PublishJob::new(1, keys(&["storymaker", "  "])).unwrap_err(),
            ValidationError::BlankSiteKey { index: 1 }
        );
    }

    #[test]
    fn test_new_publish_job_is_unqueued() {
        let pj = PublishJob::new(1, keys(&["storymaker"])).unwrap();
        assert!(!pj.is_queued());
        assert!(!pj.is_finished());
        assert!(!pj.is_aborted());
        assert_eq!(pj.site_keys, keys(&["storymaker"]));
    }

    #[test]
    fn test_cannot_finish_before_queued() {
        let mut pj = PublishJob::new(1, keys(&["storymaker"])).unwrap();
        assert!(matches!(
            pj.set_finished_at_now(),
            Err(InvalidStateError::PublishJobNotQueued { .. })
        ));
        assert!(!pj.is_finished());

        pj.set_queued_at_now();
        pj.set_finished_at_now().unwrap();
        assert!(pj.is_finished() && pj.is_queued());
        assert!(matches!(
            pj.set_finished_at_now(),
            Err(InvalidStateError::PublishJobAlreadyFinished { .. })
        ));
    }

    #[test]
    fn test_queued_with_leaves_original_untouched() {
        let pj = PublishJob::new(1, keys(&["storymaker"])).unwrap();
        let render = Job::new(JobType::Render, "", None, Some("mp4".into()));

        let (queued, jobs) = pj.queued_with(std::slice::from_ref(&render));

        assert!(!pj.is_queued());
        assert!(!render.is_queued());
        assert!(queued.is_queued());
        assert_eq!(queued.id, pj.id);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].publish_job_id, pj.id);
        assert_eq!(jobs[0].queued_at, queued.queued_at);
    }
}
