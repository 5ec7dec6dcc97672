use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use release_fetcher::{
    config::{Cli, Command, Settings},
    utils::file_name_from_url,
    Channel, DownloadCoordinator, DownloadRequest, Error, ProxyConfig, Result, TaskEvent,
    TaskHandle, TaskOutcome, UpdateClient,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = match Settings::from_cli(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let coordinator = DownloadCoordinator::new(UpdateClient::new(settings.update.clone()));
    let result = run(cli.command, &settings, &coordinator).await;
    coordinator.shutdown().await;

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => {
            eprintln!("Cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Command failed");
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "warn,release_fetcher=info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns `Ok(false)` when the user cancelled.
async fn run(command: Command, settings: &Settings, coordinator: &DownloadCoordinator) -> Result<bool> {
    match command {
        Command::Links { channel } => {
            let Some(links) = resolve(coordinator, channel, &settings.proxy).await? else {
                return Ok(false);
            };
            for (i, link) in links.iter().enumerate() {
                println!("{:>2}. {}", i + 1, link);
            }
            Ok(true)
        }
        Command::Download {
            channel,
            index,
            output,
            dir,
            overwrite,
        } => {
            if !dir.is_dir() {
                return Err(Error::Validation(format!(
                    "Directory does not exist: {}",
                    dir.display()
                )));
            }

            let Some(links) = resolve(coordinator, channel, &settings.proxy).await? else {
                return Ok(false);
            };
            let url = pick_link(&links, index)?;
            let name = output
                .or_else(|| file_name_from_url(url))
                .ok_or_else(|| Error::Validation(format!("Cannot derive a file name from {}", url)))?;
            let destination = dir.join(name);
            check_destination(&destination, overwrite)?;

            let request = DownloadRequest::new(url, &destination, settings.proxy.clone());
            let outcome = drive(coordinator.start_download(request)).await;
            match settle(outcome)? {
                Some(summary) => {
                    println!("{}", summary.path.display());
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }
}

async fn resolve(
    coordinator: &DownloadCoordinator,
    channel: Channel,
    proxy: &ProxyConfig,
) -> Result<Option<Vec<String>>> {
    settle(drive(coordinator.resolve_links(channel, proxy.clone())).await)
}

fn pick_link(links: &[String], index: usize) -> Result<&str> {
    index
        .checked_sub(1)
        .and_then(|i| links.get(i))
        .map(String::as_str)
        .ok_or_else(|| {
            Error::Validation(format!(
                "Link index {} out of range (1-{})",
                index,
                links.len()
            ))
        })
}

fn check_destination(destination: &Path, overwrite: bool) -> Result<()> {
    if destination.exists() && !overwrite {
        return Err(Error::Validation(format!(
            "{} already exists, pass --overwrite to replace it",
            destination.display()
        )));
    }
    Ok(())
}

fn settle<T>(outcome: TaskOutcome<T>) -> Result<Option<T>> {
    match outcome {
        TaskOutcome::Succeeded(value) => Ok(Some(value)),
        TaskOutcome::Cancelled => Ok(None),
        TaskOutcome::Failed(e) => Err(e),
    }
}

/// Renders a task's status text on stderr until it settles. Ctrl-C cancels it.
async fn drive<T, P>(mut handle: TaskHandle<T, P>) -> TaskOutcome<T> {
    let mut interrupted = false;
    let mut stderr = std::io::stderr();

    let outcome = loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(TaskEvent::Message(message)) => {
                    let _ = write!(stderr, "\r\x1b[2K{}", message);
                    let _ = stderr.flush();
                }
                Some(TaskEvent::Progress(_)) => {}
                Some(TaskEvent::Finished(outcome)) => break outcome,
                None => break TaskOutcome::Failed(Error::Internal("task vanished".to_string())),
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                handle.cancel();
            }
        }
    };

    let _ = writeln!(stderr);
    outcome
}
