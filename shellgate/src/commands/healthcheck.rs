use anyhow::{Context, Result};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    timeout(std::time::Duration::from_secs(5), TcpStream::connect(&config.listen_address))
        .await
        .context("timeout connecting to gateway listener")?
        .context("failed to connect to gateway listener")?;

    println!("ok");
    Ok(())
}
