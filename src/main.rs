use crate::{
    config::{Config, default_config_path, read_config},
    events::{EventSink, ServiceEvent},
    folders::{DesktopDirectoryRegistry, LOGS_DIR, resolve_original},
    layout::IconLayoutStore,
    orchestrator::{DesktopSwitchOrchestrator, SwitchOutcome, SwitchSettings},
    services::{
        desktop_icons::PlatformIconSurface,
        known_folder::{KnownFolderRedirector, PlatformKnownFolder, default_desktop_path},
        virtual_desktop::{DesktopChangeDetector, PlatformBinder, candidates_by_name},
    },
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flexi_logger::{
    Age, Cleanup, Criterion, FileSpec, LogSpecBuilder, Logger, LoggerHandle, Naming,
};
use itertools::Itertools;
use std::{fs, path::PathBuf, sync::Arc};
use tokio::sync::broadcast::error::RecvError;

mod config;
mod events;
mod folders;
mod layout;
mod orchestrator;
mod reconcile;
mod services;
#[cfg(test)]
mod testing;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Configuration file, `~/VirtualDesktops/config.toml` by default
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Follow virtual desktop switches until Ctrl+C
    #[default]
    Run,
    /// Print the active desktop and the folder of every desktop
    Status,
    /// Point the Desktop folder back at the original location and exit
    Restore,
}

fn start_logger(config: &Config) -> Result<LoggerHandle> {
    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Info
    } else {
        config.log_level.parse().unwrap_or(log::LevelFilter::Warn)
    };

    let handle = Logger::with(LogSpecBuilder::new().module("deskfolders", level).build())
        .log_to_file(FileSpec::default().directory(config.storage_root.join(LOGS_DIR)))
        .duplicate_to_stderr(flexi_logger::Duplicate::All)
        .rotate(
            Criterion::Age(Age::Day),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(7),
        )
        .start()?;
    log_panics::init();

    Ok(handle)
}

struct Services {
    registry: DesktopDirectoryRegistry,
    redirector: KnownFolderRedirector,
    detector: Arc<DesktopChangeDetector>,
    events: EventSink,
}

fn build_services(config: &Config) -> Result<Services> {
    let events = EventSink::default();

    let redirector = KnownFolderRedirector::new(Arc::new(PlatformKnownFolder), events.clone());
    let original = resolve_original(
        &config.storage_root,
        config.original_desktop.as_deref(),
        &redirector.current_path(),
        &default_desktop_path(),
    )?;
    log::info!("Original desktop is {}", original.display());

    let detector = Arc::new(DesktopChangeDetector::new(
        Box::new(PlatformBinder),
        candidates_by_name(&config.binding_candidates),
        config.poll_interval(),
        events.clone(),
    ));

    Ok(Services {
        registry: DesktopDirectoryRegistry::new(&config.storage_root, original),
        redirector,
        detector,
        events,
    })
}

async fn run(config: &Config, services: Services) -> Result<()> {
    let Services {
        registry,
        redirector,
        detector,
        events,
    } = services;

    tokio::spawn(log_events(events.clone(), Arc::clone(&detector)));

    let layouts = IconLayoutStore::new(
        registry.layouts_dir(),
        Arc::new(PlatformIconSurface),
        events.clone(),
    );
    let orchestrator = Arc::new(DesktopSwitchOrchestrator::new(
        registry,
        redirector,
        layouts,
        detector,
        SwitchSettings {
            refresh_poll_interval: config.refresh_poll_interval(),
            refresh_max_attempts: config.refresh_max_attempts,
        },
        events,
    ));

    orchestrator.start();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    log::info!("Ctrl+C received, shutting down");

    match orchestrator.stop().await {
        SwitchOutcome::Completed => Ok(()),
        outcome => anyhow::bail!("Failed to restore the original desktop ({outcome:?})"),
    }
}

/// Stands in for the tray: every event ends up in the log.
async fn log_events(events: EventSink, detector: Arc<DesktopChangeDetector>) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(ServiceEvent::DesktopSwitched(id)) if id.is_empty() => {
                log::info!("Now on the original desktop");
            }
            Ok(ServiceEvent::DesktopSwitched(id)) => {
                match detector.list_ids().iter().position(|live| *live == id) {
                    Some(index) => log::info!("Now on desktop {} ({id})", index + 1),
                    None => log::info!("Now on desktop {id}"),
                }
            }
            Ok(ServiceEvent::Notification(n)) => {
                log::debug!("Notification from {}: {}", n.source, n.message);
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Event listener fell behind, {skipped} events skipped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn status(services: &Services) {
    let binding = services
        .detector
        .initialize()
        .unwrap_or("none (degraded)");
    let current = services.detector.current_id();

    println!("Binding:          {binding}");
    println!("Current desktop:  {current}");
    println!(
        "Desktop folder:   {}",
        services.redirector.current_path().display()
    );
    println!(
        "Original folder:  {}",
        services.registry.original_desktop().display()
    );

    let ids = services.detector.list_ids();
    if ids.is_empty() {
        println!("No virtual desktops reported");
        return;
    }

    println!(
        "{}",
        ids.iter()
            .enumerate()
            .map(|(index, id)| {
                let marker = if *id == current { "*" } else { " " };
                format!(
                    "{marker} {:>2}  {id}  {}",
                    index + 1,
                    services.registry.path_for(*id).display()
                )
            })
            .join("\n")
    );
}

fn restore(services: &Services) -> Result<()> {
    let original = services.registry.original_desktop();
    services.redirector.redirect_to(original)?;
    services.redirector.refresh_shell();
    println!("Desktop folder restored to {}", original.display());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = read_config(&config_path)?;

    fs::create_dir_all(&config.storage_root)
        .with_context(|| format!("Failed to create {}", config.storage_root.display()))?;
    let _logger = start_logger(&config)?;

    let services = build_services(&config)?;

    match cli.command.unwrap_or_default() {
        Command::Run => run(&config, services).await,
        Command::Status => {
            status(&services);
            Ok(())
        }
        Command::Restore => restore(&services),
    }
}
