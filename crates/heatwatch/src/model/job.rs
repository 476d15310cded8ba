//! Backend-tracked heatmap jobs and their status state machine.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Status of a heatmap job as reported by the backend.
///
/// Jobs move `pending → processing → {completed | error}`. The two terminal
/// states accept no further transitions; see [`JobStatus::advance`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

/// Outcome of applying an observed status to a known status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The job moved forward in its lifecycle.
    Advanced,
    /// Same non-terminal state observed again; only advisory fields change.
    Refreshed,
    /// The observation would regress or touch a terminal job and is dropped.
    Stale,
}

impl JobStatus {
    /// Returns true for `completed` and `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Processing => 1,
            JobStatus::Completed | JobStatus::Error => 2,
        }
    }

    /// Guarded transition from `self` to an observed `next` status.
    pub fn advance(self, next: JobStatus) -> Transition {
        if self.is_terminal() {
            return Transition::Stale;
        }
        match next.rank().cmp(&self.rank()) {
            std::cmp::Ordering::Greater => Transition::Advanced,
            std::cmp::Ordering::Equal => Transition::Refreshed,
            std::cmp::Ordering::Less => Transition::Stale,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One backend-tracked unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Opaque identifier, stable for the job's lifetime.
    pub job_id: String,
    /// Last observed status.
    pub status: JobStatus,
    /// Advisory progress text.
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// Creation time; history is ordered newest first by this field.
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Display label of the uploaded video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_video_name: Option<String>,
    /// Display label of the uploaded floorplan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_floorplan_name: Option<String>,
    /// Number of people counted, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub people_counted: Option<u64>,
    /// Set on jobs made by [`Job::pending`] until a backend row supplies the
    /// real creation time.
    #[serde(skip)]
    pub placeholder: bool,
}

impl Job {
    /// Creates a freshly submitted job that has not been polled yet.
    pub fn pending(job_id: &str, name: Option<&str>) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: JobStatus::Pending,
            message: String::new(),
            created_at: Utc::now(),
            input_video_name: name.map(|s| s.to_string()),
            input_floorplan_name: None,
            people_counted: None,
            placeholder: true,
        }
    }

    /// Label used in history lists and notifications.
    pub fn display_name(&self) -> &str {
        self.input_video_name
            .as_deref()
            .or(self.input_floorplan_name.as_deref())
            .unwrap_or("Heatmap")
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merges richer fields from a history listing into this job.
    ///
    /// Status still goes through [`JobStatus::advance`], so a history row
    /// that lags behind the poller cannot regress a terminal job.
    pub fn merge_from(&mut self, other: &Job) {
        if self.status.advance(other.status) != Transition::Stale {
            self.status = other.status;
            if !other.message.is_empty() {
                self.message = other.message.clone();
            }
        }
        // Creation time is fixed once the backend has reported it.
        if self.placeholder && !other.placeholder {
            self.created_at = other.created_at;
            self.placeholder = false;
        }
        if other.input_video_name.is_some() {
            self.input_video_name = other.input_video_name.clone();
        }
        if other.input_floorplan_name.is_some() {
            self.input_floorplan_name = other.input_floorplan_name.clone();
        }
        if other.people_counted.is_some() {
            self.people_counted = other.people_counted;
        }
    }
}

/// Lightweight response of the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub status: JobStatus,
    #[serde(default)]
    pub message: Option<String>,
}

impl StatusReport {
    pub fn new(status: JobStatus, message: &str) -> Self {
        Self {
            status,
            message: Some(message.to_string()),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 timestamps as well as naive ISO timestamps (read as UTC).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("invalid created_at timestamp '{}'", raw))
    })
}

pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}
