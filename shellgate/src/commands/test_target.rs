use std::time::Duration;

use anyhow::{bail, Context, Result};
use shellgate_core::policy::{self, PolicyRuleSet};
use shellgate_core::pool::{ConnectionPool, ConnectionPoolConfig};
use shellgate_core::session::{AuthMethod, ConnectionTarget};
use shellgate_ssh::RusshTransport;
use tracing::info;

use crate::config::load_config;

/// `host` is `user@hostname:port`; the password is read from
/// `SHELLGATE_TEST_PASSWORD` since this command has no host inventory of
/// its own (durable host inventory is out of scope).
fn parse_host(host: &str) -> Result<(String, String, u16)> {
    let (username, rest) = host.split_once('@').context("expected user@host:port")?;
    let (hostname, port) = rest.split_once(':').unwrap_or((rest, "22"));
    let port: u16 = port.parse().context("invalid port")?;
    Ok((username.to_string(), hostname.to_string(), port))
}

pub(crate) async fn command(cli: &crate::Cli, host: &str, command: &str) -> Result<()> {
    let config = load_config(&cli.config)?;
    let (username, hostname, port) = parse_host(host)?;
    let password = std::env::var("SHELLGATE_TEST_PASSWORD")
        .context("SHELLGATE_TEST_PASSWORD must be set for test-target")?;

    let target = ConnectionTarget {
        hostname,
        port,
        username,
        auth: AuthMethod::Password(password),
    };

    let decision = policy::evaluate(command, Some(&PolicyRuleSet::denylist(Vec::new())));
    if !decision.is_allowed() {
        bail!("command blocked by policy: {decision:?}");
    }

    let pool = ConnectionPool::<RusshTransport>::new(ConnectionPoolConfig {
        pool_cap: config.pool_cap,
        connect_timeout: config.connect_timeout(),
        idle_timeout_ssh: config.idle_timeout_ssh(),
        retry_attempts: config.retry_attempts,
        retry_delay: config.retry_delay(),
    });

    let handle = pool.acquire(&target).await.context("connecting to target")?;
    let transport = handle.transport_arc();
    let (stdout, stderr, exit_code) = transport
        .exec_once(command, Duration::from_secs(30))
        .await
        .context("executing command")?;

    info!(?exit_code, "command finished");
    print!("{stdout}");
    if !stderr.is_empty() {
        eprint!("{stderr}");
    }

    pool.force_close(&handle.key).await;

    match exit_code {
        Some(0) | None => Ok(()),
        Some(code) => bail!("command exited with status {code}"),
    }
}
