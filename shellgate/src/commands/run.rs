use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::config::load_config;
use crate::server::Server;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "shellgate");

    let config = load_config(&cli.config)?;
    let listen_address = config.listen_address.clone();
    let server = Arc::new(Server::new(&config));

    tokio::select! {
        result = server.run(&listen_address) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}
