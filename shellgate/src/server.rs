//! The gateway's browser-facing transport. Framing is deliberately simple:
//! newline-delimited JSON over TCP, since the core's contract only
//! specifies already-decoded message kinds and leaves the wire format to
//! the transport layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shellgate_core::pool::{ConnectionPool, ConnectionPoolConfig};
use shellgate_core::session::SessionRegistry;
use shellgate_ssh::{Gateway, GatewayConfig, HostDirectory, HostRecord, PlaintextDecryptor, PolicyProvider, Pump, RusshTransport, TransportSink};
use shellgate_core::audit::{BufferedAuditSink, TracingAuditSink};
use shellgate_core::policy::PolicyRuleSet;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ClientMessage {
    Open { host_id: String, cols: u32, rows: u32, tenant_id: String, user_id: String },
    Input { data: Vec<u8> },
    Resize { cols: u32, rows: u32 },
    Close,
}

#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ServerMessage {
    Opened { session_id: Uuid },
    Output { data: Vec<u8> },
    Closed { reason: String },
    Error { code: String, message: String },
}

struct TcpSink {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

#[async_trait]
impl TransportSink for TcpSink {
    async fn send_output(&self, data: Vec<u8>) {
        let _ = self.tx.send(ServerMessage::Output { data });
    }

    async fn send_closed(&self, reason: String) {
        let _ = self.tx.send(ServerMessage::Closed { reason });
    }
}

/// No durable host inventory exists in this crate (Non-goal); connections
/// name their target directly as `hostname:port:username` in `host_id`.
struct InlineHostDirectory;

#[async_trait]
impl HostDirectory for InlineHostDirectory {
    async fn lookup(&self, tenant_id: &str, host_id: &str) -> Option<HostRecord> {
        let mut parts = host_id.splitn(3, ':');
        let hostname = parts.next()?.to_string();
        let port: u16 = parts.next()?.parse().ok()?;
        let username = parts.next()?.to_string();
        let password = std::env::var("SHELLGATE_TEST_PASSWORD").ok()?;
        Some(HostRecord {
            host_id: host_id.to_string(),
            tenant_id: tenant_id.to_string(),
            hostname,
            port,
            username,
            encrypted_secret: password.into_bytes(),
        })
    }
}

struct DefaultPolicyProvider;

#[async_trait]
impl PolicyProvider for DefaultPolicyProvider {
    async fn rule_set_for(&self, _tenant_id: &str, _host_id: &str) -> Option<PolicyRuleSet> {
        Some(PolicyRuleSet::denylist(Vec::new()))
    }
}

pub struct Server {
    gateway: Arc<Gateway>,
    registry: Arc<SessionRegistry>,
}

impl Server {
    pub fn new(config: &Config) -> Self {
        let registry = SessionRegistry::new(
            config.max_sessions_per_user,
            config.history_cap,
            config.idle_timeout_session(),
        );
        let pool = ConnectionPool::<RusshTransport>::new(ConnectionPoolConfig {
            pool_cap: config.pool_cap,
            connect_timeout: config.connect_timeout(),
            idle_timeout_ssh: config.idle_timeout_ssh(),
            retry_attempts: config.retry_attempts,
            retry_delay: config.retry_delay(),
        });
        let audit = Arc::new(BufferedAuditSink::new(TracingAuditSink, config.audit_queue_capacity));

        let gateway = Gateway::new(
            registry.clone(),
            pool.clone(),
            Arc::new(InlineHostDirectory),
            Arc::new(PlaintextDecryptor),
            Arc::new(DefaultPolicyProvider),
            audit,
            GatewayConfig {
                history_cap: config.history_cap,
                ..GatewayConfig::default()
            },
        );

        tokio::spawn(registry.clone().run_reaper(config.reaper_interval()));
        tokio::spawn(pool.run_reaper());

        Self { gateway, registry }
    }

    pub async fn run(self: Arc<Self>, listen_address: &str) -> anyhow::Result<()> {
        let listener = TcpListener::bind(listen_address).await?;
        info!(%listen_address, "gateway listening");

        loop {
            let (socket, peer) = listener.accept().await?;
            debug!(%peer, "accepted transport connection");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(socket).await {
                    warn!(%peer, %err, "transport connection ended with error");
                }
            });
        }
    }

    async fn handle_connection(&self, socket: TcpStream) -> anyhow::Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

        let writer = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                if let Ok(mut json) = serde_json::to_vec(&message) {
                    json.push(b'\n');
                    if write_half.write_all(&json).await.is_err() {
                        break;
                    }
                }
            }
        });

        let sink: Arc<dyn TransportSink> = Arc::new(TcpSink { tx: out_tx.clone() });
        let mut pump: Option<Arc<Pump>> = None;
        let mut session_id: Option<Uuid> = None;
        let transport_id = Uuid::new_v4().to_string();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let message: ClientMessage = match serde_json::from_str(&line) {
                Ok(m) => m,
                Err(err) => {
                    let _ = out_tx.send(ServerMessage::Error {
                        code: "bad_message".into(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            match message {
                ClientMessage::Open { host_id, cols, rows, tenant_id, user_id } => {
                    match self
                        .gateway
                        .open_session(tenant_id, user_id, host_id, Some(transport_id.clone()), cols, rows, sink.clone())
                        .await
                    {
                        Ok((session, session_pump)) => {
                            let id = session.lock().await.id;
                            session_id = Some(id);
                            pump = Some(session_pump);
                            let _ = out_tx.send(ServerMessage::Opened { session_id: id });
                        }
                        Err(err) => {
                            error!(%err, "session create failed");
                            let _ = out_tx.send(ServerMessage::Error {
                                code: "create_failed".into(),
                                message: err.to_string(),
                            });
                        }
                    }
                }
                ClientMessage::Input { data } => {
                    if let Some(p) = &pump {
                        p.push_input(data).await;
                    }
                }
                ClientMessage::Resize { cols, rows } => {
                    if let Some(p) = &pump {
                        p.push_resize(cols, rows).await;
                    }
                }
                ClientMessage::Close => {
                    if let Some(id) = session_id {
                        self.registry.terminate_session(id, "client close").await;
                    }
                    break;
                }
            }
        }

        if let Some(id) = session_id {
            self.registry.on_transport_gone(&transport_id).await;
            debug!(session_id = %id, "transport connection closed");
        }

        drop(out_tx);
        let _ = writer.await;
        Ok(())
    }
}
