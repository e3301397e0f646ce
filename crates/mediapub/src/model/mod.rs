//! Persistent records of the publish pipeline.

pub mod job;
pub mod publish_job;
pub mod site_keys;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

pub use job::{Job, JobFailure, JobFilter, JobState, JobType};
pub use publish_job::PublishJob;

/// The project whose media is being published. Owned by the caller; only the
/// id is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub title: String,
}

impl Project {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
        }
    }
}

/// Current time truncated to the store's millisecond precision, so that
/// in-memory records compare equal to what a round trip returns.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_now_has_millisecond_precision() {
        let ts = now();
        assert_eq!(ts.nanosecond() % 1_000_000, 0);
    }
}
