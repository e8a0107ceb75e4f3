//! `serialbridge` – host-side bridge to the chassis microcontroller.
//!
//! This binary:
//!
//! 1. Loads `~/.serialbridge/config.toml` (or `$SERIALBRIDGE_CONFIG`) and
//!    applies `SERIALBRIDGE_*` environment overrides.
//! 2. Opens the serial device.  If that fails it logs the cause and exits
//!    with a non-zero status without starting anything.
//! 3. Runs the inbound poller and outbound dispatcher until **Ctrl-C**, then
//!    stops both and closes the serial device.
//!
//! `serialbridge init` writes the default configuration file and exits.

mod config;

use colored::Colorize;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use serialbridge_middleware::EventBus;
use serialbridge_runtime::SerialBridge;

fn main() -> ExitCode {
    let _tracing_guard = serialbridge_runtime::init_tracing("serialbridge");

    if std::env::args().nth(1).as_deref() == Some("init") {
        return write_default_config();
    }

    print_banner();

    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            info!(path = %config::config_path().display(), "config loaded");
            cfg
        }
        Ok(None) => {
            info!("no config file found; using defaults");
            config::Config::default()
        }
        Err(e) => {
            warn!(error = %e, "config error; using defaults");
            config::Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build Tokio runtime");
            return ExitCode::FAILURE;
        }
    };
    runtime.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> ExitCode {
    let bus = Arc::new(EventBus::new(cfg.bus_capacity()));

    let bridge = match SerialBridge::open(&cfg.bridge_config(), bus) {
        Ok(bridge) => bridge,
        Err(e) => {
            error!(error = %e, "Failed to connect to serial device");
            println!("{}: {}", "Serial connection failed".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "  Connected to {} at {} baud.",
        cfg.device_path.bold(),
        cfg.baud_rate
    );
    if let Some(port) = cfg.ws_port {
        println!("  rosbridge endpoint on port {}.", port.to_string().bold());
    }

    let handle = bridge.start();

    let trigger = handle.shutdown_trigger();
    if let Err(e) = ctrlc::set_handler(move || trigger.trigger()) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    handle.stopped().await;
    println!();
    println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());

    let stats = handle.shutdown().await;
    println!(
        "  {} {} status record(s) published, {} frame(s) sent.",
        "✓".green().bold(),
        stats.poller.published,
        stats.dispatcher.frames_written
    );
    ExitCode::SUCCESS
}

fn write_default_config() -> ExitCode {
    match config::save(&config::Config::default()) {
        Ok(path) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!(
        "  {} {}",
        "serialbridge".bold().cyan(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  JSON telemetry in, binary motion frames out");
    println!();
}
