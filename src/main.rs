//! LR MIDI GW
//!
//! Bridges a MIDI control surface to a photo-editing host.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lr_midi_gw::catalog::CommandCatalog;
use lr_midi_gw::config::AppConfig;
use lr_midi_gw::midi::devices::MidirScanner;
use lr_midi_gw::midi::{DeviceManager, PortDirection};
use lr_midi_gw::paths::AppPaths;
use lr_midi_gw::Bridge;

/// LR MIDI GW - drive a photo-editing host from a MIDI controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: detected per install mode)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Profile file to activate instead of the configured default
    #[arg(short, long)]
    profile: Option<String>,

    /// List available MIDI ports
    #[arg(long)]
    list_devices: bool,

    /// List supported host commands
    #[arg(long)]
    list_commands: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let paths = match &args.config {
        Some(config) => AppPaths::with_config(config.clone()),
        None => AppPaths::detect(),
    };
    paths
        .ensure_directories()
        .with_context(|| format!("Failed to create data directories in {}", paths.base_dir().display()))?;

    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("Starting LR MIDI GW v{}...", env!("CARGO_PKG_VERSION"));
    info!(
        "Data directory: {} ({})",
        paths.base_dir().display(),
        if paths.is_portable { "portable" } else { "installed" }
    );

    let config = AppConfig::load(&paths.config).await?;

    if args.list_devices {
        list_devices(&config);
        return Ok(());
    }
    if args.list_commands {
        list_commands(&CommandCatalog::new(config.locale()));
        return Ok(());
    }

    let bridge = Bridge::build(config, &paths, args.profile).await?;
    let running = bridge.start();

    tokio::select! {
        _ = shutdown_signal() => {}
        _ = running.terminated() => {}
    }

    running.shutdown().await?;
    info!("LR MIDI GW shutdown complete");
    Ok(())
}

/// Console plus a daily rolling file in the logs directory
fn init_logging(
    level: &str,
    paths: &AppPaths,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "lr-midi-gw.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn list_devices(config: &AppConfig) {
    use colored::*;

    let devices = DeviceManager::new(Box::new(MidirScanner), config.midi.pinned_devices());
    devices.refresh();
    let all = devices.list_devices();

    println!("\n{}", "=== Available MIDI Ports ===".bold().cyan());
    for (direction, title) in [(PortDirection::Input, "Input Ports:"), (PortDirection::Output, "Output Ports:")] {
        println!("\n{}", title.bold());
        let ports: Vec<_> = all.iter().filter(|d| d.direction == direction).collect();
        if ports.is_empty() {
            println!("  {}", "No ports found".dimmed());
            continue;
        }
        for port in ports {
            let selected = match direction {
                PortDirection::Input => config.midi.wants_input(&port.name),
                PortDirection::Output => config.midi.wants_output(&port.name),
            };
            let marker = if selected {
                "[ACTIVE]".green()
            } else {
                "[IGNORED]".yellow()
            };
            println!("  {} #{:<3} {}", marker, port.id.0, port.name);
        }
    }
    println!();
}

fn list_commands(catalog: &CommandCatalog) {
    use colored::*;

    println!(
        "\n{}",
        format!("=== Host Commands ({}) ===", catalog.locale()).bold().cyan()
    );
    for group in catalog.groups() {
        println!("\n{}", group.bold());
        for info in catalog.all().iter().filter(|i| i.group == group) {
            println!(
                "  {:<24} {} {}",
                info.id.bright_white(),
                info.display_name,
                format!("[{} .. {}]", info.min, info.max).dimmed()
            );
        }
    }
    println!();
}
