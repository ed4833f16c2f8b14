mod handle;
mod registry;
mod types;

pub use handle::{NullPumpHandle, PumpHandle};
pub use registry::{RegistryStats, SessionRegistry};
pub use types::{
    AuthMethod, CommandRecord, CommandStatus, ConnectionTarget, HistoryRing, HostId, Session,
    SessionId, SessionState, TenantId, TerminalSize, TransportId, UserId,
};
