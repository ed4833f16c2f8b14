use uuid::Uuid;

/// Errors surfaced by the session registry.
#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("user already holds the maximum of {0} sessions")]
    SessionLimitExceeded(usize),
    #[error("session {0} not found")]
    SessionNotFound(Uuid),
    #[error("transport {0} is already bound to a session")]
    TransportAlreadyBound(String),
}

/// Errors surfaced by the SSH connection pool.
#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    #[error("authentication rejected by host")]
    ConnectAuthError,
    #[error("connection timed out")]
    ConnectTimeout,
    #[error("connection refused")]
    ConnectRefused,
    #[error("connection failed: {0}")]
    ConnectUnknown(String),
    #[error("connection pool is saturated")]
    PoolSaturated,
    #[error("failed to open channel: {0}")]
    ChannelOpenError(String),
    #[error("channel closed")]
    ChannelClosed,
}

/// Top-level gateway-facade error kinds.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error("host not found")]
    SessionCreateHostNotFound,
    #[error("session creation is disabled")]
    SessionCreateDisabled,
    #[error("authentication failed")]
    SessionCreateAuthFailed,
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}
