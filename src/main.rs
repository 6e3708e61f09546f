//! netgate binary entry point.

use std::sync::Arc;

use anyhow::Context;
use log::{info, warn};

use netgate::api::{self, AppState};
use netgate::cli;
use netgate::config::Config;
use netgate::dispatcher::Dispatcher;
use netgate::logging;
use netgate::session::SessionRegistry;
use netgate::sim::SimulatedConnector;
use netgate::transport::{Connector, NetworkConnector};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::parse_args()?;
    if args.help {
        cli::print_help();
        return Ok(());
    }
    if args.version {
        cli::print_version();
        return Ok(());
    }

    let config = Config::load(&args)?;
    logging::try_init(config.log_filter()).context("failed to initialize logging")?;
    info!("netgate v{}", env!("CARGO_PKG_VERSION"));

    let connector: Arc<dyn Connector> = if config.server.simulate {
        warn!("simulate mode: every device is answered by an in-process Cisco simulator");
        Arc::new(SimulatedConnector::demo())
    } else {
        Arc::new(NetworkConnector::new(
            config.security_options(),
            config.connect_timeout(),
        ))
    };

    let registry = Arc::new(SessionRegistry::new(connector, config.registry_settings()));
    registry.start_reaper();
    let dispatcher = Dispatcher::new(registry);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("shutting down");
    };
    let served = api::serve(
        &config.to_server_config(),
        AppState::new(dispatcher.clone()),
        shutdown,
    )
    .await;

    dispatcher.shutdown().await;
    served.with_context(|| format!("HTTP server on {} failed", config.to_server_config().bind_address()))
}
