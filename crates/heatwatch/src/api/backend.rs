//! The seam between the orchestration core and the heatmap service.

use async_trait::async_trait;

use super::ApiError;
use crate::model::{
    Analysis, CustomHeatmapRequest, CustomProgress, ExportFile, ExportFormat, Job, StatusReport,
};

/// Request/response operations offered by the heatmap backend.
///
/// Every poller and fetcher receives an `Arc<dyn HeatmapBackend>`, so tests
/// and alternative transports plug in here.
#[async_trait]
pub trait HeatmapBackend: Send + Sync {
    /// Lightweight status of one job.
    async fn job_status(&self, job_id: &str) -> Result<StatusReport, ApiError>;

    /// Full job history, in backend order.
    async fn job_history(&self) -> Result<Vec<Job>, ApiError>;

    /// Starts a custom heatmap over a time window of a completed job.
    async fn submit_custom_heatmap(
        &self,
        job_id: &str,
        request: &CustomHeatmapRequest,
    ) -> Result<(), ApiError>;

    /// Completion fraction of the custom heatmap for `job_id`.
    async fn custom_progress(&self, job_id: &str) -> Result<CustomProgress, ApiError>;

    /// Derived analytics summary for a completed job.
    async fn analysis(&self, job_id: &str) -> Result<Analysis, ApiError>;

    async fn delete_job(&self, job_id: &str) -> Result<(), ApiError>;

    /// Downloads an export as opaque bytes.
    async fn export(&self, job_id: &str, format: ExportFormat) -> Result<ExportFile, ApiError>;
}
