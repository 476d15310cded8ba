pub mod analysis;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod model;
pub mod poller;
pub mod probe;
pub mod registry;
pub mod secrets;
pub mod session;
pub mod shared;

#[cfg(test)]
mod test_support;

pub use analysis::AnalysisFetcher;
pub use api::{ApiError, HeatmapBackend, HttpBackend, ResourceUrls};
pub use broadcast::{
    ContextSignal, ContextSignals, CrossContextNotifier, EventSink, JobEvent, JobEventBus,
    JobEventKind, JobNotifier, Notification, NotificationLevel,
};
pub use config::{load_config, ClientConfig};
pub use context::ExecutionContext;
pub use error::{ConfigError, HeatwatchError, Result, StoreError, ValidationError};
pub use model::{
    Analysis, Area, CustomHeatmapRequest, CustomSubJob, ExportFile, ExportFormat, Job, JobStatus,
};
pub use poller::{CustomProgressPoller, PollOutcome, PollerHandle, StatusPoller};
pub use probe::{DurationProbe, Mp4HeaderProbe};
pub use registry::JobRegistry;
pub use secrets::{resolve_api_token, SecretError};
pub use session::{HeatmapSession, SessionOptions, SessionSnapshot};
pub use shared::SharedStore;
