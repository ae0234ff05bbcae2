mod cli;
mod error;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use viera_api::{Discovery, TransportConfig};
use viera_config::Config;
use viera_core::{BroadcastSink, Connector, DeviceId, MemoryRegistry, NormalizedMessage};

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose, cli.global.log_json);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8, json: bool) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let path = cli
        .global
        .config
        .clone()
        .unwrap_or_else(viera_config::config_path);
    debug!(path = %path.display(), command = ?cli.command, "dispatching command");

    match cli.command {
        Command::Discover { timeout } => discover(Duration::from_secs(timeout)).await,
        Command::Run => {
            let cfg = viera_config::load_config_from(&path)?;
            serve(&cfg).await
        }
        Command::Pair { device, pin } => {
            let cfg = viera_config::load_config_from(&path)?;
            pair(cfg, &path, &device, pin).await
        }
        Command::Send { device, action } => {
            let cfg = viera_config::load_config_from(&path)?;
            let (connector, _) = build_connector(&cfg)?;
            // restores stored sessions for televisions that are on
            connector.poll_once().await;
            connector
                .execute(&DeviceId::from(device), action.into())
                .await?;
            Ok(())
        }
    }
}

fn build_connector(cfg: &Config) -> Result<(Connector, BroadcastSink), CliError> {
    let config = viera_config::to_connector_config(cfg)?;
    let sink = BroadcastSink::new();
    let connector = Connector::new(
        config,
        Arc::new(MemoryRegistry::new()),
        Arc::new(sink.clone()),
    )?;
    Ok((connector, sink))
}

/// One SSDP scan, one JSON line per television.
async fn discover(timeout: Duration) -> Result<(), CliError> {
    let discovery = Discovery::new(&TransportConfig::default())?;
    let devices = discovery.discover(timeout).await?;
    if devices.is_empty() {
        warn!("no televisions answered");
    }
    for device in devices {
        println!("{}", serde_json::to_string(&device)?);
    }
    Ok(())
}

/// Run the connector until ctrl-c.
async fn serve(cfg: &Config) -> Result<(), CliError> {
    let (connector, sink) = build_connector(cfg)?;
    let printer = tokio::spawn(print_messages(sink.subscribe()));

    connector.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    connector.stop().await;
    printer.abort();
    Ok(())
}

async fn print_messages(mut rx: broadcast::Receiver<NormalizedMessage>) {
    loop {
        match rx.recv().await {
            Ok(message) => match serde_json::to_string(&message) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "cannot serialize message"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "output fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Interactive pin-code pairing; stores the granted credentials.
async fn pair(
    mut cfg: Config,
    path: &Path,
    device: &str,
    pin: Option<String>,
) -> Result<(), CliError> {
    let (connector, _) = build_connector(&cfg)?;
    let id = DeviceId::from(device);

    connector.pair_request_pin(&id).await?;
    let pin = match pin {
        Some(pin) => pin,
        None => dialoguer::Input::<String>::new()
            .with_prompt("Pin shown on the television")
            .interact_text()?,
    };

    let authorization = connector.pair_authorize(&id, pin.trim()).await?;
    viera_config::set_credentials(
        &mut cfg,
        device,
        &authorization.application_id,
        &authorization.encryption_key,
    )?;
    viera_config::save_config_to(&cfg, path)?;
    connector.stop().await;

    println!("Paired with {device}; credentials saved to {}", path.display());
    Ok(())
}
