//! Session registry, SSH connection pool, and command policy engine for
//! the remote shell gateway. Has no network dependency of its own; the
//! transport is supplied by whoever drives `pool::SshTransport` and
//! `session::PumpHandle`.

pub mod audit;
pub mod error;
pub mod policy;
pub mod pool;
pub mod session;

pub use error::{GatewayError, PoolError, RegistryError};
