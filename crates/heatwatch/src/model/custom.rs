//! Custom heatmap sub-jobs scoped to a time window of a completed job.

use serde::{Deserialize, Serialize};

/// Store area filter for a custom heatmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Area {
    #[default]
    All,
    Entrance,
    Checkout,
    Aisles,
    Displays,
}

impl Area {
    pub fn as_str(self) -> &'static str {
        match self {
            Area::All => "all",
            Area::Entrance => "entrance",
            Area::Checkout => "checkout",
            Area::Aisles => "aisles",
            Area::Displays => "displays",
        }
    }
}

impl std::fmt::Display for Area {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Area {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(Area::All),
            "entrance" => Ok(Area::Entrance),
            "checkout" => Ok(Area::Checkout),
            "aisles" => Ok(Area::Aisles),
            "displays" => Ok(Area::Displays),
            other => Err(format!(
                "unknown area '{}' (expected all, entrance, checkout, aisles or displays)",
                other
            )),
        }
    }
}

/// Body of the custom heatmap submission.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CustomHeatmapRequest {
    pub start_time: f64,
    pub end_time: f64,
    pub area: Area,
}

/// Response of the custom progress endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CustomProgress {
    #[serde(default)]
    pub progress: f64,
}

/// Client-side record of the outstanding custom computation.
///
/// There is at most one per session; `generation` tells a superseded
/// sub-job's poller apart from the current one for the same parent.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomSubJob {
    pub parent_job_id: String,
    pub request: CustomHeatmapRequest,
    pub progress: f64,
    pub generation: u64,
}

impl CustomSubJob {
    pub fn new(parent_job_id: &str, request: CustomHeatmapRequest, generation: u64) -> Self {
        Self {
            parent_job_id: parent_job_id.to_string(),
            request,
            progress: 0.0,
            generation,
        }
    }

    /// Records an observed progress value and returns the value now held.
    ///
    /// Progress never decreases; out-of-range input is clamped first.
    pub fn observe(&mut self, raw: f64) -> f64 {
        let clamped = clamp_progress(raw);
        if clamped > self.progress {
            self.progress = clamped;
        }
        self.progress
    }

    pub fn is_done(&self) -> bool {
        self.progress >= 1.0
    }
}

/// Clamps a backend progress fraction to `[0, 1]`.
///
/// Values outside the range are a protocol violation; they are logged and
/// clamped rather than propagated. NaN reads as no progress.
pub fn clamp_progress(raw: f64) -> f64 {
    if raw.is_nan() {
        log::warn!("Custom progress was NaN, treating as 0");
        return 0.0;
    }
    if !(0.0..=1.0).contains(&raw) {
        log::warn!("Custom progress {} outside [0, 1], clamping", raw);
    }
    raw.clamp(0.0, 1.0)
}
