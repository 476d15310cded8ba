//! `reqwest`-backed implementation of [`HeatmapBackend`].

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use super::{ApiError, HeatmapBackend, ResourceUrls};
use crate::config::ClientConfig;
use crate::model::{
    Analysis, CustomHeatmapRequest, CustomProgress, ExportFile, ExportFormat, Job, StatusReport,
};

/// Creates an HTTP client with the configured timeouts.
pub fn create_http_client(config: &ClientConfig) -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(config.connect_timeout())
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ApiError::Client(e.to_string()))
}

/// HTTP client for the heatmap service.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    urls: ResourceUrls,
    token: Option<SecretString>,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig, token: Option<SecretString>) -> Result<Self, ApiError> {
        Ok(Self::with_client(
            create_http_client(config)?,
            ResourceUrls::new(&config.base_url),
            token,
        ))
    }

    /// Reuses an existing client, e.g. one shared with the duration probe.
    pub fn with_client(client: Client, urls: ResourceUrls, token: Option<SecretString>) -> Self {
        Self {
            client,
            urls,
            token,
        }
    }

    pub fn urls(&self) -> &ResourceUrls {
        &self.urls
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, ApiError> {
        debug!("GET {}", url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        parse_response(response).await
    }

    /// Returns the response unchanged on success, or a status error
    /// carrying the (truncated) body.
    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::status(status.as_u16(), &body));
        }
        Ok(response)
    }
}

async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let response = HttpBackend::ensure_success(response).await?;
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}

#[async_trait]
impl HeatmapBackend for HttpBackend {
    async fn job_status(&self, job_id: &str) -> Result<StatusReport, ApiError> {
        self.get_json(self.urls.status(job_id)).await
    }

    async fn job_history(&self) -> Result<Vec<Job>, ApiError> {
        self.get_json(self.urls.jobs()).await
    }

    async fn submit_custom_heatmap(
        &self,
        job_id: &str,
        request: &CustomHeatmapRequest,
    ) -> Result<(), ApiError> {
        let url = self.urls.custom_heatmap(job_id);
        debug!("POST {} ({}s-{}s, {})", url, request.start_time, request.end_time, request.area);
        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn custom_progress(&self, job_id: &str) -> Result<CustomProgress, ApiError> {
        self.get_json(self.urls.custom_progress(job_id)).await
    }

    async fn analysis(&self, job_id: &str) -> Result<Analysis, ApiError> {
        self.get_json(self.urls.analysis(job_id)).await
    }

    async fn delete_job(&self, job_id: &str) -> Result<(), ApiError> {
        let url = self.urls.job(job_id);
        debug!("DELETE {}", url);
        let response = self.authorize(self.client.delete(&url)).send().await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn export(&self, job_id: &str, format: ExportFormat) -> Result<ExportFile, ApiError> {
        let url = self.urls.export(job_id, format.extension());
        debug!("GET {}", url);
        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = Self::ensure_success(response).await?;

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| format.mime_type().to_string());
        let bytes = response.bytes().await?;

        Ok(ExportFile {
            bytes: bytes.to_vec(),
            mime_type,
            filename: format.filename(job_id),
        })
    }
}
