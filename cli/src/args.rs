use clap::{Parser, Subcommand};
use heatwatch::{Area, ExportFormat};
use std::path::PathBuf;

/// Heatwatch - terminal client for video-to-heatmap jobs
///
/// Every running instance is one execution context: completions and
/// cancellations announced by any instance sharing the store directory show
/// up here too.
#[derive(Parser, Debug)]
#[command(name = "heatwatch")]
#[command(version)]
#[command(about = "Track heatmap jobs and relay their notifications", long_about = None)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short = 'c', long = "config", env = "HEATWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend base URL (overrides baseUrl from the config file)
    #[arg(short = 'u', long = "base-url")]
    pub base_url: Option<String>,

    /// Log filter, e.g. "heatwatch=debug" (defaults to HEATWATCH_LOG or "info")
    #[arg(long = "log")]
    pub log: Option<String>,

    /// Write logs as JSON lines
    #[arg(long = "log-json")]
    pub log_json: bool,

    /// Print results and notifications as JSON
    #[arg(long = "json")]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List completed jobs, newest first
    History,

    /// Poll a submitted job until it finishes (Ctrl+C cancels tracking)
    Watch {
        job_id: String,

        /// Display name announced on completion
        #[arg(long)]
        name: Option<String>,
    },

    /// Print notifications from every context until interrupted
    Listen,

    /// Generate a custom heatmap over a time window of a completed job
    Custom {
        job_id: String,

        /// Window start in seconds
        #[arg(long)]
        start: Option<f64>,

        /// Window end in seconds
        #[arg(long)]
        end: Option<f64>,

        /// Store area filter (all, entrance, checkout, aisles, displays)
        #[arg(long, default_value = "all")]
        area: Area,
    },

    /// Show the analytics summary of a completed job
    Analysis { job_id: String },

    /// Download a job's export
    Export {
        job_id: String,

        /// csv or pdf
        #[arg(long, default_value = "csv")]
        format: ExportFormat,

        /// Output file (defaults to heatmap_<job_id>.<ext>)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Delete a job and everything derived from it
    Delete { job_id: String },
}
