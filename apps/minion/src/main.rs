mod config;
mod once;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use probemesh::minion::{Coordinator, UdpTransport, outbound_ip};
use probemesh::{Evaluator, LogTrigger, ProbeEventProcessor, ProbeScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "probemesh-minion", version, about = "ProbeMesh minion: probes HTTP chains and coordinates with its peers")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/probemesh/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the minion daemon until interrupted
    Run,
    /// Run one probe immediately and dump its context to a file
    Once {
        /// Name of the probe to run
        probe: String,
        /// Directory receiving the context dump
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    logger::init();
    let cli = Cli::parse();
    let config = Config::from_config(cli.config.as_ref()).context("failed to load configuration")?;

    match cli.command {
        Command::Run => {
            run(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Once { probe, output_dir } => {
            let Some(probe) = config.probe(&probe) else {
                bail!("no probe named {probe} in configuration");
            };
            let report = once::run_once(probe, &config.probing, &output_dir).await?;
            println!("{}", report.dump_path.display());
            Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Config => {
            print!("{config}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    let ip = match config.minion.bind_ip {
        Some(ip) => ip,
        None => {
            let ip = outbound_ip().await.context("failed to determine outbound address")?;
            warn!(ip = %ip, "bind address missing from config, using outbound address");
            ip
        }
    };

    let coordinator_config = config.minion.coordinator();
    let bind = SocketAddr::from((ip, coordinator_config.port));
    let transport = UdpTransport::bind(bind)
        .await
        .with_context(|| format!("failed to bind UDP socket at {bind}"))?;
    let coordinator = Coordinator::new(coordinator_config, ip, Arc::new(transport));

    let processor = Arc::new(
        ProbeEventProcessor::new(Arc::new(LogTrigger)).with_window(config.probing.history_window),
    );
    let options = config
        .probing
        .execute_options()
        .with_evaluator(Arc::new(Evaluator::with_cache()));
    let mut scheduler = ProbeScheduler::new(processor, options);
    for probe in config.probes {
        let name = probe.name.clone();
        if let Err(err) = scheduler.register(probe).await {
            error!(probe = %name, error = %err, "probe rejected, it will never run");
        }
    }

    let shutdown = CancellationToken::new();
    let signal = {
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutting down minion");
            shutdown.cancel();
        }
    };

    info!(ip = %ip, probes = scheduler.len(), "minion warming up");
    tokio::join!(coordinator.run(shutdown.clone()), scheduler.run(shutdown.clone()), signal);
    info!("minion stopped");
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => warn!(error = %err, "cannot listen for SIGTERM, only Ctrl-C stops the minion"),
        }
    }

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
