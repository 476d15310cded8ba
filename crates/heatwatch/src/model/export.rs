//! Export formats produced by the backend.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Csv,
    Pdf,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Pdf => "pdf",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    /// Download filename for a job's export.
    pub fn filename(self, job_id: &str) -> String {
        format!("heatmap_{}.{}", job_id, self.extension())
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "pdf" => Ok(ExportFormat::Pdf),
            other => Err(format!("Unsupported export format: {}", other)),
        }
    }
}

/// Opaque export payload ready to be written out.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}
