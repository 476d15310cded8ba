//! Analysis retrieval for the selected job.

use std::sync::Arc;

use crate::api::{ApiError, HeatmapBackend};
use crate::model::{Analysis, Job, JobStatus};

/// Shown when the backend gives no reason of its own.
pub const ANALYSIS_FALLBACK_ERROR: &str = "Failed to fetch analysis";

/// Fetches the analytics summary of completed jobs.
#[derive(Clone)]
pub struct AnalysisFetcher {
    backend: Arc<dyn HeatmapBackend>,
}

impl AnalysisFetcher {
    pub fn new(backend: Arc<dyn HeatmapBackend>) -> Self {
        Self { backend }
    }

    /// Only a selected, completed job has an analysis.
    pub fn applies_to(job: Option<&Job>) -> bool {
        job.is_some_and(|job| job.status == JobStatus::Completed)
    }

    /// Fetches the analysis, mapping failures to the message shown to the
    /// user.
    pub async fn fetch(&self, job_id: &str) -> Result<Analysis, String> {
        log::debug!("Fetching analysis for {}", job_id);
        self.backend.analysis(job_id).await.map_err(|e| {
            log::warn!("Analysis fetch for {} failed: {}", job_id, e);
            error_message(&e)
        })
    }
}

pub fn error_message(error: &ApiError) -> String {
    error
        .backend_message()
        .unwrap_or_else(|| ANALYSIS_FALLBACK_ERROR.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AreaDistribution, AreaShare};
    use crate::test_support::ScriptedBackend;

    #[test]
    fn test_applies_only_to_completed() {
        let mut job = Job::pending("J1", None);
        assert!(!AnalysisFetcher::applies_to(Some(&job)));
        job.status = JobStatus::Completed;
        assert!(AnalysisFetcher::applies_to(Some(&job)));
        assert!(!AnalysisFetcher::applies_to(None));
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let analysis = Analysis {
            total_visitors: 77,
            areas: AreaDistribution {
                high: Some(AreaShare { percentage: 40.0 }),
                ..Default::default()
            },
            ..Default::default()
        };
        let fetcher =
            AnalysisFetcher::new(Arc::new(ScriptedBackend::new().with_analysis(analysis.clone())));
        assert_eq!(fetcher.fetch("J1").await, Ok(analysis));
    }

    #[tokio::test]
    async fn test_fetch_error_messages() {
        let fetcher = AnalysisFetcher::new(Arc::new(
            ScriptedBackend::new().with_analysis_error(404, r#"{"error": "No tracking data"}"#),
        ));
        assert_eq!(fetcher.fetch("J1").await, Err("No tracking data".to_string()));

        let fetcher = AnalysisFetcher::new(Arc::new(
            ScriptedBackend::new().with_analysis_error(502, "bad gateway"),
        ));
        assert_eq!(
            fetcher.fetch("J1").await,
            Err(ANALYSIS_FALLBACK_ERROR.to_string())
        );
    }
}
