//! pulsed: the Pulse daemon.
//!
//! Single binary that assembles every Pulse subsystem:
//! - State store (redb)
//! - Probe scheduler
//! - Status engine (metrics, incidents, deployments)
//! - Snapshot publisher
//! - REST API
//!
//! # Usage
//!
//! ```text
//! pulsed run --config pulse.toml --listen 0.0.0.0:8080
//! pulsed check --config pulse.toml
//! pulsed validate --config pulse.toml
//! pulsed init --name api --url https://api.example.com/healthz
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulse_core::PulseConfig;
use pulsed::{Daemon, open_store};

const DEFAULT_FILTER: &str = "info,pulsed=debug,pulse=debug";

#[derive(Parser)]
#[command(name = "pulsed", about = "Pulse fleet status daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Probe on schedule, serve the API and publish snapshots.
    Run {
        /// Path to pulse.toml.
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,

        /// Listen address, overriding `server.listen`.
        #[arg(long)]
        listen: Option<String>,

        /// Emit logs as JSON lines.
        #[arg(long)]
        log_json: bool,
    },
    /// Run one probe cycle and print the resulting snapshot as JSON.
    Check {
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,
    },
    /// Parse and validate a configuration file.
    Validate {
        #[arg(long, default_value = "pulse.toml")]
        config: PathBuf,
    },
    /// Write a starter configuration with a single target.
    Init {
        /// Name of the first target.
        #[arg(long)]
        name: String,

        /// Health URL of the first target.
        #[arg(long)]
        url: String,

        #[arg(long, default_value = "pulse.toml")]
        output: PathBuf,

        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    // stdout is reserved for `check` output.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            listen,
            log_json,
        } => {
            init_tracing(log_json);
            run(config, listen).await
        }
        Command::Check { config } => {
            init_tracing(false);
            check(config).await
        }
        Command::Validate { config } => {
            init_tracing(false);
            validate(config)
        }
        Command::Init {
            name,
            url,
            output,
            force,
        } => init(&name, &url, output, force),
    }
}

async fn run(config_path: PathBuf, listen: Option<String>) -> anyhow::Result<()> {
    info!(config = ?config_path, "pulse daemon starting");
    let config = PulseConfig::from_file(&config_path)?;

    let store = open_store(&config)?;
    let daemon = Daemon::build(&config, store)?;

    let addr = listen.unwrap_or_else(|| config.server.listen.clone());
    let listener = tokio::net::TcpListener::bind(addr.as_str()).await?;

    daemon
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
        })
        .await
}

async fn check(config_path: PathBuf) -> anyhow::Result<()> {
    let config = PulseConfig::from_file(&config_path)?;
    let daemon = Daemon::build(&config, None)?;

    let (report, snapshot) = daemon.check_once().await;
    info!(
        operational = report.operational,
        degraded = report.degraded,
        down = report.down,
        "check complete"
    );
    println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    Ok(())
}

fn validate(config_path: PathBuf) -> anyhow::Result<()> {
    let config = PulseConfig::from_file(&config_path)?;
    println!(
        "{}: ok ({} targets, interval {})",
        config_path.display(),
        config.targets.len(),
        config.scheduler.interval
    );
    Ok(())
}

fn init(name: &str, url: &str, output: PathBuf, force: bool) -> anyhow::Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", output.display());
    }
    let config = PulseConfig::scaffold(name, url);
    config.validate()?;
    std::fs::write(&output, config.to_toml_string()?)?;
    println!("wrote {}", output.display());
    Ok(())
}
