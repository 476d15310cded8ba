//! Client side of the heatmap backend: the [`HeatmapBackend`] seam, its
//! HTTP implementation, and URL building.

pub mod backend;
pub mod error;
pub mod http;
pub mod urls;

pub use backend::HeatmapBackend;
pub use error::ApiError;
pub use http::{create_http_client, HttpBackend};
pub use urls::ResourceUrls;
