mod commands;
mod config;
mod server;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "shellgate", version, about = "Interactive remote shell gateway")]
pub struct Cli {
    #[arg(short, long, env = "SHELLGATE_CONFIG", default_value = "config.yaml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway and accept connections.
    Run,
    /// Validate configuration without starting the gateway.
    Check,
    /// Probe a running gateway's health endpoint.
    Healthcheck,
    /// Open a one-shot session against a host and run a single command.
    TestTarget {
        host_id: String,
        command: String,
    },
}

fn install_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .event_format(fmt::format().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    install_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Command::Run => commands::run::command(&cli).await,
        Command::Check => commands::check::command(&cli).await,
        Command::Healthcheck => commands::healthcheck::command(&cli).await,
        Command::TestTarget { host_id, command } => {
            commands::test_target::command(&cli, host_id, command).await
        }
    }
}
