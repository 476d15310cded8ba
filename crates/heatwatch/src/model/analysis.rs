//! Derived analytics summary for a completed job.

use serde::{Deserialize, Serialize};

/// Read-only summary attached to a completed job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Analysis {
    #[serde(default)]
    pub total_visitors: u64,
    #[serde(default)]
    pub areas: AreaDistribution,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub peak_hours: Vec<PeakHour>,
}

/// Traffic density bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficLevel {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for TrafficLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrafficLevel::High => write!(f, "High"),
            TrafficLevel::Medium => write!(f, "Medium"),
            TrafficLevel::Low => write!(f, "Low"),
        }
    }
}

/// Share of traffic for one density bucket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct AreaShare {
    #[serde(default)]
    pub percentage: f64,
}

/// Percentages per density bucket.
///
/// The three values are advisory and are not required to sum to 100.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AreaDistribution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<AreaShare>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<AreaShare>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<AreaShare>,
}

impl AreaDistribution {
    /// Percentage for a bucket, `0` when the backend omitted it.
    pub fn percentage(&self, level: TrafficLevel) -> f64 {
        let share = match level {
            TrafficLevel::High => self.high,
            TrafficLevel::Medium => self.medium,
            TrafficLevel::Low => self.low,
        };
        share.map(|s| s.percentage).unwrap_or(0.0)
    }

    /// All buckets in display order.
    pub fn entries(&self) -> [(TrafficLevel, f64); 3] {
        [
            (TrafficLevel::High, self.percentage(TrafficLevel::High)),
            (TrafficLevel::Medium, self.percentage(TrafficLevel::Medium)),
            (TrafficLevel::Low, self.percentage(TrafficLevel::Low)),
        ]
    }
}

/// A discovered high-traffic interval.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeakHour {
    pub start_minute: u32,
    pub end_minute: u32,
    pub count: u64,
}

impl PeakHour {
    /// Minute range label, e.g. `"10-15"`.
    pub fn label(&self) -> String {
        format!("{}-{}", self.start_minute, self.end_minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_from_backend_payload() {
        let json = r#"{
            "total_visitors": 128,
            "areas": {"high": {"percentage": 40.5}, "low": {"percentage": 20}},
            "recommendations": ["Move displays closer to the entrance"],
            "peak_hours": [{"start_minute": 10, "end_minute": 15, "count": 33}]
        }"#;

        let analysis: Analysis = serde_json::from_str(json).unwrap();
        assert_eq!(analysis.total_visitors, 128);
        assert_eq!(analysis.areas.percentage(TrafficLevel::High), 40.5);
        assert_eq!(analysis.areas.percentage(TrafficLevel::Medium), 0.0);
        assert_eq!(analysis.areas.percentage(TrafficLevel::Low), 20.0);
        assert_eq!(analysis.recommendations.len(), 1);
        assert_eq!(analysis.peak_hours[0].label(), "10-15");
    }

    #[test]
    fn test_empty_analysis_defaults() {
        let analysis: Analysis = serde_json::from_str("{}").unwrap();
        assert_eq!(analysis, Analysis::default());
        assert!(analysis.peak_hours.is_empty());
    }
}
