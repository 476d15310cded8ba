//! Heatwatch CLI
//!
//! One process is one execution context. It drives a [`HeatmapSession`],
//! prints the notifications its context receives, and shares completion and
//! cancellation events with other instances through the shared store
//! directory.
//!
//! ```bash
//! # Follow a freshly submitted job
//! heatwatch --base-url http://localhost:8000 watch 3f2a --name store.mp4
//!
//! # In another terminal: see its completion arrive
//! heatwatch --base-url http://localhost:8000 listen
//! ```

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use heatwatch::api::create_http_client;
use heatwatch::config::validate_config;
use heatwatch::logging::init_logging;
use heatwatch::{
    load_config, resolve_api_token, ClientConfig, ContextSignal, ExecutionContext, HeatmapSession,
    HttpBackend, Mp4HeaderProbe, Notification, ResourceUrls,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

mod args;
mod commands;
mod error;

use args::Cli;
use error::{CliError, Result};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log.as_deref(), cli.log_json) {
        eprintln!("Warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match (&cli.config, &cli.base_url) {
        (Some(path), _) => load_config(path)?,
        (None, Some(url)) => ClientConfig::new(url),
        (None, None) => return Err(CliError::NoConfig),
    };
    if let Some(url) = &cli.base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    validate_config(&config)?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let token = resolve_api_token(config.token_sources())?;

    let client = create_http_client(&config)?;
    let backend = Arc::new(HttpBackend::with_client(
        client.clone(),
        ResourceUrls::new(&config.base_url),
        token.clone(),
    ));
    let probe = Arc::new(Mp4HeaderProbe::new(client, &config, token));

    let mut context = ExecutionContext::start(&config)?;
    log::info!(
        "Context {} using store {}",
        context.context_id(),
        context
            .store()
            .map(|s| s.dir().display().to_string())
            .unwrap_or_default()
    );
    let printer = spawn_printer(context.subscribe(), cli.json);

    let session = HeatmapSession::for_context(&context, backend, probe, &config);
    let result = commands::execute(cli.command, &session, &config, cli.json).await;

    session.shutdown().await;
    drop(session);
    context.shutdown().await;
    drop(context);

    // Give queued notifications a moment to reach stdout.
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        log::debug!("Notification printer still running at exit");
    }

    result
}

fn print_notification(notification: &Notification, json: bool) {
    if json {
        match serde_json::to_string(notification) {
            Ok(line) => println!("{}", line),
            Err(e) => log::warn!("Failed to encode notification: {}", e),
        }
    } else {
        println!("{}", notification);
    }
}

fn spawn_printer(mut rx: broadcast::Receiver<ContextSignal>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ContextSignal::Notify(notification)) => print_notification(&notification, json),
                Ok(ContextSignal::Refresh) => {}
                Err(RecvError::Lagged(n)) => {
                    log::warn!("Notification printer lagged, missed {} signals", n);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
