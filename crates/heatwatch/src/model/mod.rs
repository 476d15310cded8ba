//! Domain types shared by the registry, pollers and session.

pub mod analysis;
pub mod custom;
pub mod export;
pub mod job;

pub use analysis::{Analysis, AreaDistribution, AreaShare, PeakHour, TrafficLevel};
pub use custom::{clamp_progress, Area, CustomHeatmapRequest, CustomProgress, CustomSubJob};
pub use export::{ExportFile, ExportFormat};
pub use job::{Job, JobStatus, StatusReport, Transition};
