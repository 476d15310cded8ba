//! In-memory registry of known jobs for one execution context.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{Job, JobStatus, StatusReport, Transition};

/// Result of applying a polled status to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The job moved to a new status.
    Applied {
        previous: JobStatus,
        current: JobStatus,
    },
    /// Same non-terminal status; message refreshed.
    Refreshed,
    /// Dropped: the job is terminal or the observation would regress it.
    Stale,
    /// Dropped: the job was deleted in this context.
    Removed,
    /// Dropped: the registry has never seen this job.
    Unknown,
}

#[derive(Default)]
struct Entries {
    jobs: HashMap<String, Job>,
    /// Ids deleted in this context.
    removed: HashSet<String>,
}

impl Entries {
    fn upsert(&mut self, job: &Job) -> bool {
        if self.removed.contains(&job.job_id) {
            log::debug!("Ignoring upsert for deleted job {}", job.job_id);
            return false;
        }
        match self.jobs.get_mut(&job.job_id) {
            Some(existing) => existing.merge_from(job),
            None => {
                self.jobs.insert(job.job_id.clone(), job.clone());
            }
        }
        true
    }
}

/// Single source of truth for jobs in the current context.
///
/// Holds at most one entry per `job_id`. Deleted ids are remembered so that
/// a completion or history row arriving after the deletion is a no-op. Jobs
/// and tombstones share one lock, so a deletion never interleaves with an
/// insert of the same id.
#[derive(Default)]
pub struct JobRegistry {
    entries: RwLock<Entries>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Inserts a job or merges it into the existing entry.
    ///
    /// Returns false when the id was deleted in this context.
    pub fn upsert(&self, job: Job) -> bool {
        self.write().upsert(&job)
    }

    /// Merges history rows without dropping anything. Returns how many rows
    /// were accepted.
    pub fn merge_history(&self, history: Vec<Job>) -> usize {
        let mut entries = self.write();
        history.iter().filter(|job| entries.upsert(job)).count()
    }

    /// Makes a full history listing authoritative.
    ///
    /// Rows are merged as in [`JobRegistry::merge_history`]. Known jobs
    /// missing from the listing are dropped unless their id is in `keep`.
    /// Returns the dropped ids, sorted.
    pub fn replace_history(&self, history: Vec<Job>, keep: &HashSet<String>) -> Vec<String> {
        let mut entries = self.write();
        let listed: HashSet<&str> = history.iter().map(|job| job.job_id.as_str()).collect();
        let mut dropped: Vec<String> = entries
            .jobs
            .keys()
            .filter(|id| !listed.contains(id.as_str()) && !keep.contains(*id))
            .cloned()
            .collect();
        for id in &dropped {
            entries.jobs.remove(id);
        }
        for job in &history {
            entries.upsert(job);
        }
        dropped.sort();
        dropped
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.read().jobs.get(job_id).cloned()
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.read().jobs.contains_key(job_id)
    }

    pub fn is_removed(&self, job_id: &str) -> bool {
        self.read().removed.contains(job_id)
    }

    /// Completed jobs, newest first.
    pub fn list_completed(&self) -> Vec<Job> {
        let mut completed: Vec<Job> = self
            .read()
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Completed)
            .cloned()
            .collect();
        completed.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        completed
    }

    /// Removes a job immediately and remembers the deletion.
    pub fn remove(&self, job_id: &str) -> Option<Job> {
        let mut entries = self.write();
        entries.removed.insert(job_id.to_string());
        entries.jobs.remove(job_id)
    }

    /// Applies a polled status through the guarded transition.
    pub fn apply_status(&self, job_id: &str, report: &StatusReport) -> StatusUpdate {
        let mut entries = self.write();
        if entries.removed.contains(job_id) {
            return StatusUpdate::Removed;
        }
        let Some(job) = entries.jobs.get_mut(job_id) else {
            return StatusUpdate::Unknown;
        };

        let previous = job.status;
        match previous.advance(report.status) {
            Transition::Stale => StatusUpdate::Stale,
            transition => {
                job.status = report.status;
                if let Some(message) = &report.message {
                    job.message = message.clone();
                }
                if transition == Transition::Advanced {
                    StatusUpdate::Applied {
                        previous,
                        current: report.status,
                    }
                } else {
                    StatusUpdate::Refreshed
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn job(id: &str, status: JobStatus, age_minutes: i64) -> Job {
        let mut job = Job::pending(id, Some(&format!("{}.mp4", id)));
        job.status = status;
        job.created_at = Utc::now() - Duration::minutes(age_minutes);
        job.placeholder = false;
        job
    }

    #[test]
    fn test_registry_creation() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.list_completed().is_empty());
    }

    #[test]
    fn test_one_entry_per_id() {
        let registry = JobRegistry::new();
        registry.upsert(job("J1", JobStatus::Pending, 5));
        registry.upsert(job("J1", JobStatus::Processing, 5));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("J1").unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn test_list_completed_ordering_and_filter() {
        let registry = JobRegistry::new();
        registry.merge_history(vec![
            job("old", JobStatus::Completed, 60),
            job("new", JobStatus::Completed, 1),
            job("running", JobStatus::Processing, 0),
            job("broken", JobStatus::Error, 2),
        ]);

        let ids: Vec<String> = registry
            .list_completed()
            .into_iter()
            .map(|j| j.job_id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn test_apply_status_lifecycle() {
        let registry = JobRegistry::new();
        registry.upsert(job("J1", JobStatus::Pending, 0));

        assert_eq!(
            registry.apply_status("J1", &StatusReport::new(JobStatus::Processing, "10%")),
            StatusUpdate::Applied {
                previous: JobStatus::Pending,
                current: JobStatus::Processing
            }
        );
        assert_eq!(
            registry.apply_status("J1", &StatusReport::new(JobStatus::Processing, "50%")),
            StatusUpdate::Refreshed
        );
        assert_eq!(registry.get("J1").unwrap().message, "50%");

        registry.apply_status("J1", &StatusReport::new(JobStatus::Completed, "done"));
        assert_eq!(
            registry.apply_status("J1", &StatusReport::new(JobStatus::Processing, "late")),
            StatusUpdate::Stale
        );
        let stored = registry.get("J1").unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.message, "done");
    }

    #[test]
    fn test_unknown_job() {
        let registry = JobRegistry::new();
        assert_eq!(
            registry.apply_status("nope", &StatusReport::new(JobStatus::Completed, "")),
            StatusUpdate::Unknown
        );
    }

    #[test]
    fn test_deletion_wins_over_late_updates() {
        let registry = JobRegistry::new();
        registry.upsert(job("J1", JobStatus::Processing, 0));

        assert!(registry.remove("J1").is_some());
        assert!(!registry.contains("J1"));
        assert_eq!(
            registry.apply_status("J1", &StatusReport::new(JobStatus::Completed, "done")),
            StatusUpdate::Removed
        );
        assert!(!registry.upsert(job("J1", JobStatus::Completed, 0)));
        assert!(registry.list_completed().is_empty());
    }

    #[test]
    fn test_replace_history_drops_unlisted_jobs() {
        let registry = JobRegistry::new();
        registry.merge_history(vec![
            job("J1", JobStatus::Completed, 10),
            job("J2", JobStatus::Completed, 5),
        ]);
        registry.upsert(job("J3", JobStatus::Pending, 0));

        let keep: HashSet<String> = ["J3".to_string()].into();
        let dropped = registry.replace_history(vec![job("J1", JobStatus::Completed, 10)], &keep);

        assert_eq!(dropped, vec!["J2".to_string()]);
        assert!(!registry.contains("J2"));
        assert!(registry.contains("J3"));
        // Gone from the listing, not deleted here: the id may come back.
        assert!(!registry.is_removed("J2"));
        assert!(registry.upsert(job("J2", JobStatus::Completed, 5)));
    }

    #[test]
    fn test_replace_history_respects_deletions() {
        let registry = JobRegistry::new();
        registry.upsert(job("J1", JobStatus::Completed, 1));
        registry.remove("J1");

        let dropped =
            registry.replace_history(vec![job("J1", JobStatus::Completed, 1)], &HashSet::new());
        assert!(dropped.is_empty());
        assert!(registry.list_completed().is_empty());
    }

    #[test]
    fn test_remove_racing_upserts_always_wins() {
        use std::sync::{Arc, Barrier};

        for round in 0..200 {
            let registry = Arc::new(JobRegistry::new());
            let id = format!("J{}", round);
            let barrier = Arc::new(Barrier::new(2));

            let writer = {
                let registry = registry.clone();
                let barrier = barrier.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..50 {
                        registry.upsert(job(&id, JobStatus::Completed, 0));
                    }
                })
            };
            barrier.wait();
            registry.remove(&id);
            writer.join().unwrap();

            assert!(!registry.contains(&id), "{} came back after removal", id);
            assert!(registry.is_removed(&id));
        }
    }
}
