use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::client::AuthResult;
use russh::keys::{PrivateKey, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelId, ChannelMsg, Disconnect};
use shellgate_core::pool::SshTransport;
use shellgate_core::session::{AuthMethod, ConnectionTarget};
use shellgate_core::PoolError;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Host key verification is intentionally accept-all: this gateway targets
/// lab/internal hosts and does not implement a trust store (Non-goal).
struct AcceptAllHandler;

impl client::Handler for AcceptAllHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// One authenticated SSH transport to a single host, shared across
/// channels the pool hands out for that `(host, port, user)` key.
pub struct RusshTransport {
    handle: Mutex<Handle<AcceptAllHandler>>,
}

fn classify_connect_error(err: &russh::Error) -> PoolError {
    match err {
        russh::Error::IO(io_err) => match io_err.kind() {
            std::io::ErrorKind::TimedOut => PoolError::ConnectTimeout,
            std::io::ErrorKind::ConnectionRefused => PoolError::ConnectRefused,
            _ => PoolError::ConnectUnknown(io_err.to_string()),
        },
        other => PoolError::ConnectUnknown(other.to_string()),
    }
}

#[async_trait]
impl SshTransport for RusshTransport {
    type Channel = ShellChannel;

    async fn connect(target: &ConnectionTarget, timeout: Duration) -> Result<Self, PoolError> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(timeout),
            ..Default::default()
        });
        let address = (target.hostname.as_str(), target.port);

        let mut handle = tokio::time::timeout(
            timeout,
            client::connect(config, address, AcceptAllHandler),
        )
        .await
        .map_err(|_| PoolError::ConnectTimeout)?
        .map_err(|err| classify_connect_error(&err))?;

        let auth_result = match &target.auth {
            AuthMethod::Password(password) => handle
                .authenticate_password(&target.username, password)
                .await
                .map_err(|err| PoolError::ConnectUnknown(err.to_string()))?,
            AuthMethod::Key(key_bytes) => {
                let key_pair = PrivateKey::from_openssh(key_bytes)
                    .map_err(|err| PoolError::ConnectUnknown(err.to_string()))?;
                let key = PrivateKeyWithHashAlg::new(Arc::new(key_pair), None);
                handle
                    .authenticate_publickey(&target.username, key)
                    .await
                    .map_err(|err| PoolError::ConnectUnknown(err.to_string()))?
            }
        };

        if !matches!(auth_result, AuthResult::Success) {
            return Err(PoolError::ConnectAuthError);
        }

        debug!(host = %target.hostname, user = %target.username, "ssh transport authenticated");
        Ok(Self {
            handle: Mutex::new(handle),
        })
    }

    async fn open_channel(&self, cols: u32, rows: u32) -> Result<Self::Channel, PoolError> {
        let handle = self.handle.lock().await;
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|err| PoolError::ChannelOpenError(err.to_string()))?;

        channel
            .request_pty(false, "xterm-256color", cols, rows, 0, 0, &[])
            .await
            .map_err(|err| PoolError::ChannelOpenError(err.to_string()))?;
        channel
            .request_shell(false)
            .await
            .map_err(|err| PoolError::ChannelOpenError(err.to_string()))?;

        let id = channel.id();
        Ok(ShellChannel {
            channel: Mutex::new(channel),
            id,
        })
    }

    /// Opens and immediately closes a throwaway channel as a cheap
    /// keep-alive round trip; a failure (or a timeout) marks the transport
    /// unhealthy without closing it.
    async fn probe(&self, deadline: Duration) -> bool {
        let handle = self.handle.lock().await;
        match tokio::time::timeout(deadline, handle.channel_open_session()).await {
            Ok(Ok(channel)) => {
                let _ = channel.close().await;
                true
            }
            _ => false,
        }
    }

    async fn close(&self) {
        let handle = self.handle.lock().await;
        if let Err(err) = handle
            .disconnect(Disconnect::ByApplication, "gateway shutdown", "en")
            .await
        {
            warn!(%err, "error disconnecting ssh transport");
        }
    }
}

/// A single PTY-backed shell channel opened over a pooled transport. Owned
/// exclusively by one `Pump` for its lifetime.
pub struct ShellChannel {
    channel: Mutex<russh::Channel<client::Msg>>,
    id: ChannelId,
}

impl ShellChannel {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub async fn write(&self, data: &[u8]) -> Result<(), PoolError> {
        let channel = self.channel.lock().await;
        channel
            .data(data)
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }

    pub async fn resize(&self, cols: u32, rows: u32) -> Result<(), PoolError> {
        let channel = self.channel.lock().await;
        channel
            .window_change(cols, rows, 0, 0)
            .await
            .map_err(|_| PoolError::ChannelClosed)
    }

    /// Reads the next chunk of channel traffic with a short deadline so the
    /// output forwarder can periodically observe the stop flag instead of
    /// blocking indefinitely on a quiet channel.
    pub async fn read(&self, read_timeout: Duration) -> Option<ChannelEvent> {
        let mut channel = self.channel.lock().await;
        match tokio::time::timeout(read_timeout, channel.wait()).await {
            Ok(Some(ChannelMsg::Data { data })) => Some(ChannelEvent::Data(data.to_vec())),
            Ok(Some(ChannelMsg::ExtendedData { data, .. })) => Some(ChannelEvent::Data(data.to_vec())),
            Ok(Some(ChannelMsg::ExitStatus { exit_status })) => {
                Some(ChannelEvent::ExitStatus(exit_status as i32))
            }
            Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) => Some(ChannelEvent::Closed),
            Ok(Some(_)) => Some(ChannelEvent::Other),
            Ok(None) => Some(ChannelEvent::Closed),
            Err(_) => Some(ChannelEvent::Other),
        }
    }

    pub async fn close(&self) {
        let channel = self.channel.lock().await;
        let _ = channel.close().await;
    }
}

pub enum ChannelEvent {
    Data(Vec<u8>),
    ExitStatus(i32),
    Closed,
    Other,
}

impl RusshTransport {
    /// One-shot non-interactive command execution, used by the pump's
    /// one-shot execute path. Distinct from
    /// `open_channel`, which always allocates a PTY for interactive mode.
    pub async fn exec_once(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<(String, String, Option<i32>), PoolError> {
        let handle = self.handle.lock().await;
        let mut channel = handle
            .channel_open_session()
            .await
            .map_err(|err| PoolError::ChannelOpenError(err.to_string()))?;
        drop(handle);

        channel
            .exec(true, command)
            .await
            .map_err(|err| PoolError::ChannelOpenError(err.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, channel.wait()).await {
                Ok(Some(ChannelMsg::Data { data })) => stdout.extend_from_slice(&data),
                Ok(Some(ChannelMsg::ExtendedData { data, .. })) => stderr.extend_from_slice(&data),
                Ok(Some(ChannelMsg::ExitStatus { exit_status })) => {
                    exit_code = Some(exit_status as i32);
                }
                Ok(Some(ChannelMsg::Eof)) | Ok(Some(ChannelMsg::Close)) | Ok(None) => break,
                Ok(Some(_)) => continue,
                Err(_) => break,
            }
        }

        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        ))
    }
}
