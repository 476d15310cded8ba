//! Subcommand handlers. Each one drives the session the way a page would.

use std::path::PathBuf;
use std::time::Duration;

use heatwatch::{ClientConfig, HeatmapSession, Job, SessionSnapshot};
use tokio::time::Instant;

use crate::args::Command;
use crate::error::{CliError, Result};

const WATCH_TICK: Duration = Duration::from_millis(250);

pub async fn execute(
    command: Command,
    session: &HeatmapSession,
    config: &ClientConfig,
    json: bool,
) -> Result<()> {
    match command {
        Command::History => history(session, json).await,
        Command::Watch { job_id, name } => watch(session, &job_id, name.as_deref(), json).await,
        Command::Listen => listen(session).await,
        Command::Custom {
            job_id,
            start,
            end,
            area,
        } => {
            select_completed(session, &job_id).await?;
            // The probe is advisory: give it its timeout, then go on without it.
            wait_until(session, config.probe.timeout(), |s| s.video_duration.is_some()).await;
            session.request_custom_heatmap(start, end, area).await?;
            follow_custom_progress(session).await;
            let snap = session.snapshot();
            if let Some(url) = snap.custom_heatmap_url {
                println!("{}", url);
            }
            Ok(())
        }
        Command::Analysis { job_id } => {
            select_completed(session, &job_id).await?;
            let snap = wait_until(session, config.request_timeout(), |s| !s.analysis_loading).await;
            print_analysis(&snap, json)
        }
        Command::Export {
            job_id,
            format,
            output,
        } => {
            select_completed(session, &job_id).await?;
            let file = session.export(format).await?;
            let path = output.unwrap_or_else(|| PathBuf::from(&file.filename));
            std::fs::write(&path, &file.bytes).map_err(|e| CliError::Write {
                path: path.clone(),
                source: e,
            })?;
            println!("Wrote {} ({}, {} bytes)", path.display(), file.mime_type, file.bytes.len());
            Ok(())
        }
        Command::Delete { job_id } => {
            session.delete_job(&job_id).await?;
            Ok(())
        }
    }
}

async fn select_completed(session: &HeatmapSession, job_id: &str) -> Result<Job> {
    session.load_history(Some(job_id)).await?;
    session
        .snapshot()
        .selected_job
        .filter(|job| job.job_id == job_id)
        .ok_or_else(|| CliError::NotCompleted(job_id.to_string()))
}

/// Polls snapshots until `done` holds or `limit` passes; returns the last one.
async fn wait_until<F>(session: &HeatmapSession, limit: Duration, done: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let deadline = Instant::now() + limit;
    loop {
        let snap = session.snapshot();
        if done(&snap) || Instant::now() >= deadline {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn history(session: &HeatmapSession, json: bool) -> Result<()> {
    let jobs = session.load_history(None).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }
    if jobs.is_empty() {
        println!("No completed heatmaps.");
    }
    for job in &jobs {
        println!(
            "{}  {}  {}  people={}",
            job.job_id,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.display_name(),
            job.people_counted
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    Ok(())
}

async fn watch(session: &HeatmapSession, job_id: &str, name: Option<&str>, json: bool) -> Result<()> {
    session.track_job(job_id, name);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_message: Option<String> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                session.cancel_job(job_id);
                return Ok(());
            }
            _ = tokio::time::sleep(WATCH_TICK) => {}
        }

        let snap = session.snapshot();
        if snap.status_message != last_message {
            if let Some(message) = &snap.status_message {
                log::info!("{}: {}", job_id, message);
            }
            last_message = snap.status_message.clone();
        }
        if !snap.generating {
            if json {
                println!("{}", serde_json::to_string_pretty(&snap)?);
            }
            return Ok(());
        }
    }
}

async fn listen(session: &HeatmapSession) -> Result<()> {
    // Initial list so refresh signals have something to update.
    if let Err(e) = session.load_history(None).await {
        log::warn!("Initial history load failed: {}", e);
    }
    println!("Listening for job events, Ctrl+C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to wait for Ctrl+C: {}", e);
    }
    Ok(())
}

async fn follow_custom_progress(session: &HeatmapSession) {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut shown = None;

    loop {
        let snap = session.snapshot();
        let Some(progress) = snap.custom_progress else {
            return;
        };
        if shown != Some(progress) {
            println!("Progress: {:.0}%", progress * 100.0);
            shown = Some(progress);
        }
        if progress >= 1.0 {
            return;
        }
        tokio::select! {
            _ = &mut ctrl_c => return,
            _ = tokio::time::sleep(WATCH_TICK) => {}
        }
    }
}

fn print_analysis(snap: &SessionSnapshot, json: bool) -> Result<()> {
    if let Some(error) = &snap.analysis_error {
        println!("Analysis unavailable: {}", error);
        return Ok(());
    }
    let Some(analysis) = &snap.analysis else {
        println!("Analysis not available yet.");
        return Ok(());
    };
    if json {
        println!("{}", serde_json::to_string_pretty(analysis)?);
        return Ok(());
    }

    println!("Total visitors: {}", analysis.total_visitors);
    for (level, percentage) in analysis.areas.entries() {
        println!("  {:<6} {:>5.1}%", level, percentage);
    }
    if !analysis.peak_hours.is_empty() {
        println!("Peak hours:");
        for peak in &analysis.peak_hours {
            println!("  {} min: {}", peak.label(), peak.count);
        }
    }
    if !analysis.recommendations.is_empty() {
        println!("Recommendations:");
        for recommendation in &analysis.recommendations {
            println!("  - {}", recommendation);
        }
    }
    Ok(())
}
