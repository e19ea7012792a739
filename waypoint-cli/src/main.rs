// Waypoint: resolve a working API host, print the trace, inspect or reset persisted state.

mod config;
mod events;
mod resolver;
mod store;
mod transport;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use waypoint_core::{codec, PersistedState};

use crate::config::Config;
use crate::events::EventLog;
use crate::resolver::{Resolver, Settings};
use crate::store::Store;
use crate::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "waypoint", version, about = "Endpoint discovery and failover")]
struct Args {
    /// Config file (default: ~/.config/waypoint/config.toml, then /etc/waypoint/config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one resolution cycle and print its trace
    Resolve,
    /// Print the persisted state as JSON
    Show,
    /// Health-check an API host (default: the persisted endpoint)
    Ping { host: Option<String> },
    /// Reset persisted state to defaults, keeping the device id
    Reset,
    /// Encrypt a host URL into a cloud registry entry
    EncryptHost { url: String },
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Some(Command::EncryptHost { url }) = &args.command {
        println!("{}", codec::encrypt_host_entry(url));
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = config::load(args.config.as_deref()).context("loading config")?;
    tracing::debug!(state = %cfg.state_path.display(), "config loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cfg, args.command.unwrap_or(Command::Resolve)))
}

async fn run(cfg: Config, command: Command) -> anyhow::Result<ExitCode> {
    let store = Arc::new(Store::new(&cfg.state_path, defaults(&cfg)));
    store
        .hydrate()
        .await
        .with_context(|| format!("loading state from {}", cfg.state_path.display()))?;

    let resolver = Resolver::new(
        Arc::new(HttpTransport::new()),
        store.clone(),
        EventLog::new(),
        Settings::from(&cfg),
    );

    match command {
        Command::Resolve => {
            let result = resolver.resolve().await;
            let lines = resolver.log().lines();
            tracing::debug!(phase = ?resolver.phase(), events = lines.len(), "cycle complete");
            for line in lines {
                println!("{line}");
            }
            match result {
                Some(host) => {
                    println!("{host}");
                    Ok(ExitCode::SUCCESS)
                }
                None => {
                    eprintln!("No available lines found");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Command::Show => {
            let state = store.snapshot().await;
            println!("{}", serde_json::to_string_pretty(&state)?);
            println!("visitor: {}", codec::device_tag(&state.device_id));
            Ok(ExitCode::SUCCESS)
        }
        Command::Ping { host } => {
            let host = match host {
                Some(h) => h,
                None => store.snapshot().await.api_endpoint,
            };
            anyhow::ensure!(!host.is_empty(), "no API endpoint resolved yet");
            if resolver.ping_api(&host).await {
                println!("{host}: ok");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("{host}: unreachable");
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Reset => {
            store.reset().await?;
            tracing::info!(path = %store.path().display(), "state reset");
            Ok(ExitCode::SUCCESS)
        }
        Command::EncryptHost { url } => {
            println!("{}", codec::encrypt_host_entry(&url));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn defaults(cfg: &Config) -> PersistedState {
    PersistedState {
        api_hosts: cfg.api_hosts.clone(),
        clouds: cfg.clouds.clone(),
        ..Default::default()
    }
}

/// stderr, so the trace and results on stdout stay scriptable.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
