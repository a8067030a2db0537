use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dhcpswarm_core::{Error, Interface};
use dhcpswarm_session::{
    wait_for_server, DeliveryTable, RawTransport, SessionOrchestrator, Shutdown,
};

mod args;

use args::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = cli.into_config();
    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        return ExitCode::from(2);
    }

    let interface = match Interface::by_name(&config.interface) {
        Ok(interface) => interface,
        Err(e) => {
            error!(error = %e, "interface lookup failed");
            return ExitCode::from(2);
        }
    };
    info!(name = %interface.name, mac = %interface.mac_address, "using interface");
    if let Some(server) = config.server_v4 {
        info!(%server, "expecting DHCPv4 server");
    }

    let table = Arc::new(DeliveryTable::new());
    let mut transport = match RawTransport::open(&interface, Arc::clone(&table)) {
        Ok(transport) => transport,
        Err(e) => {
            error!(error = %e, "could not open the raw channel");
            return ExitCode::from(2);
        }
    };

    let shutdown = Shutdown::new();
    spawn_signal_listener(shutdown.clone());

    let orchestrator = SessionOrchestrator::new(config, transport.sink(), table, shutdown);

    if let Err(e) = wait_for_server(&orchestrator.context()).await {
        transport.shutdown();
        return match e {
            Error::Interrupted => {
                info!("interrupted before the swarm started");
                ExitCode::SUCCESS
            }
            _ => {
                error!(error = %e, "server readiness probe failed");
                ExitCode::from(2)
            }
        };
    }

    let run = orchestrator.run().await;
    transport.shutdown();

    println!("{}", run.summary);
    if run.summary.failed > 0 {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

fn spawn_signal_listener(shutdown: Shutdown) {
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, winding down");
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "SIGTERM handler unavailable");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
