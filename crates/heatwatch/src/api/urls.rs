//! Endpoint and resource locators for the heatmap backend.

/// Builds backend URLs from a base address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUrls {
    base_url: String,
}

impl ResourceUrls {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn jobs(&self) -> String {
        format!("{}/api/heatmap_jobs", self.base_url)
    }

    pub fn job(&self, job_id: &str) -> String {
        format!("{}/{}", self.jobs(), job_id)
    }

    pub fn status(&self, job_id: &str) -> String {
        format!("{}/status", self.job(job_id))
    }

    pub fn custom_heatmap(&self, job_id: &str) -> String {
        format!("{}/custom_heatmap", self.job(job_id))
    }

    pub fn custom_progress(&self, job_id: &str) -> String {
        format!("{}/custom_heatmap_progress", self.job(job_id))
    }

    pub fn analysis(&self, job_id: &str) -> String {
        format!("{}/analysis", self.job(job_id))
    }

    pub fn export(&self, job_id: &str, extension: &str) -> String {
        format!("{}/export/{}", self.job(job_id), extension)
    }

    /// Processed video, used by the duration probe.
    pub fn processed_video(&self, job_id: &str) -> String {
        format!("{}/processed_video", self.job(job_id))
    }

    /// Full-length heatmap image.
    pub fn heatmap_image(&self, job_id: &str) -> String {
        format!("{}/heatmap", self.job(job_id))
    }

    /// Heatmap image for a custom window.
    pub fn custom_heatmap_image(&self, job_id: &str, start_time: f64, end_time: f64) -> String {
        format!(
            "{}?start_time={}&end_time={}",
            self.custom_heatmap(job_id),
            start_time,
            end_time
        )
    }
}
