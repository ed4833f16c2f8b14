use anyhow::Result;
use tracing::info;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    load_config(&cli.config)?;
    info!("No problems found");
    Ok(())
}
