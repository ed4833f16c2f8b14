use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shellgate_core::policy::PolicyRuleSet;
use shellgate_core::pool::ConnectionPool;
use shellgate_core::session::{AuthMethod, ConnectionTarget, HostId, Session, SessionRegistry, TenantId, TransportId, UserId};
use shellgate_core::{audit::BufferedAuditSink, GatewayError, PoolError};
use tokio::sync::Mutex;
use tracing::{error, info_span, Instrument};
use zeroize::Zeroize;

use crate::pump::{Pump, TransportSink};
use crate::transport::RusshTransport;

/// A host's connection info as stored by whatever owns host inventory.
/// `encrypted_secret` is opaque to this crate; only `SecretDecryptor` knows
/// how to open it.
#[derive(Clone)]
pub struct HostRecord {
    pub host_id: HostId,
    pub tenant_id: TenantId,
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub encrypted_secret: Vec<u8>,
}

#[async_trait]
pub trait HostDirectory: Send + Sync {
    async fn lookup(&self, tenant_id: &str, host_id: &str) -> Option<HostRecord>;
}

#[async_trait]
pub trait SecretDecryptor: Send + Sync {
    async fn decrypt(&self, encrypted_secret: &[u8]) -> Result<AuthMethod, GatewayError>;
}

#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn rule_set_for(&self, tenant_id: &str, host_id: &str) -> Option<PolicyRuleSet>;
}

pub struct GatewayConfig {
    pub channel_open_timeout: Duration,
    pub history_cap: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            channel_open_timeout: Duration::from_secs(5),
            history_cap: 200,
        }
    }
}

/// The only place in the crate that touches cleartext
/// credentials; they are zeroed from the stack as soon as the channel is
/// open.
pub struct Gateway {
    registry: Arc<SessionRegistry>,
    pool: Arc<ConnectionPool<RusshTransport>>,
    directory: Arc<dyn HostDirectory>,
    decryptor: Arc<dyn SecretDecryptor>,
    policy: Arc<dyn PolicyProvider>,
    audit: Arc<BufferedAuditSink>,
    config: GatewayConfig,
}

impl Gateway {
    pub fn new(
        registry: Arc<SessionRegistry>,
        pool: Arc<ConnectionPool<RusshTransport>>,
        directory: Arc<dyn HostDirectory>,
        decryptor: Arc<dyn SecretDecryptor>,
        policy: Arc<dyn PolicyProvider>,
        audit: Arc<BufferedAuditSink>,
        config: GatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            pool,
            directory,
            decryptor,
            policy,
            audit,
            config,
        })
    }

    pub async fn open_session(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        host_id: HostId,
        transport_id: Option<TransportId>,
        cols: u32,
        rows: u32,
        sink: Arc<dyn TransportSink>,
    ) -> Result<(Arc<Mutex<Session>>, Arc<Pump>), GatewayError> {
        let span = info_span!("open_session", %tenant_id, %user_id, %host_id);
        async {
            let host = self
                .directory
                .lookup(&tenant_id, &host_id)
                .await
                .ok_or(GatewayError::SessionCreateHostNotFound)?;

            let mut auth = self.decryptor.decrypt(&host.encrypted_secret).await?;

            let target = ConnectionTarget {
                hostname: host.hostname.clone(),
                port: host.port,
                username: host.username.clone(),
                auth: auth.clone(),
            };
            zero_auth(&mut auth);

            let handle = self.pool.acquire(&target).await.map_err(|err| {
                if matches!(err, PoolError::ConnectAuthError) {
                    GatewayError::SessionCreateAuthFailed
                } else {
                    GatewayError::Pool(err)
                }
            })?;

            let channel = match tokio::time::timeout(
                self.config.channel_open_timeout,
                handle.open_channel(cols, rows),
            )
            .await
            {
                Ok(Ok(channel)) => Arc::new(channel),
                Ok(Err(err)) => {
                    self.pool.release(&handle.key).await;
                    return Err(GatewayError::Pool(err));
                }
                Err(_) => {
                    self.pool.release(&handle.key).await;
                    return Err(GatewayError::Pool(PoolError::ChannelOpenError("timed out".into())));
                }
            };

            let session = match self
                .registry
                .create(
                    user_id.clone(),
                    tenant_id.clone(),
                    host_id.clone(),
                    target,
                    transport_id,
                )
                .await
            {
                Ok(session) => session,
                Err(err) => {
                    self.pool.release(&handle.key).await;
                    return Err(GatewayError::Registry(err));
                }
            };
            let session_id = session.lock().await.id;

            let rule_set = self.policy.rule_set_for(&tenant_id, &host_id).await;
            let transport = handle.transport_arc();

            let pump = Pump::spawn(
                session_id,
                tenant_id.clone(),
                user_id.clone(),
                host_id.clone(),
                session.clone(),
                channel,
                transport,
                self.pool.clone(),
                handle.key.clone(),
                rule_set,
                self.audit.clone(),
                sink,
            );

            if let Err(err) = self.registry.attach_pump(session_id, pump.clone()).await {
                self.unwind(session_id, "failed to attach pump").await;
                return Err(GatewayError::Registry(err));
            }

            Ok((session, pump))
        }
        .instrument(span)
        .await
    }

    async fn unwind(&self, session_id: shellgate_core::session::SessionId, reason: &str) {
        error!(%session_id, reason, "unwinding partially-created session");
        self.registry.terminate_session(session_id, reason).await;
    }
}

fn zero_auth(auth: &mut AuthMethod) {
    match auth {
        AuthMethod::Password(s) => s.zeroize(),
        AuthMethod::Key(k) => k.zeroize(),
    }
}

/// Treats the stored secret as an already-decrypted UTF-8 password. Useful
/// for local testing and the `test-target` CLI command; real deployments
/// supply a decryptor backed by the configured key management scheme.
#[derive(Clone)]
pub struct PlaintextDecryptor;

#[async_trait]
impl SecretDecryptor for PlaintextDecryptor {
    async fn decrypt(&self, encrypted_secret: &[u8]) -> Result<AuthMethod, GatewayError> {
        String::from_utf8(encrypted_secret.to_vec())
            .map(AuthMethod::Password)
            .map_err(|_| GatewayError::SessionCreateAuthFailed)
    }
}
