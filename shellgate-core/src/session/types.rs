use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

pub type SessionId = Uuid;
pub type UserId = String;
pub type TenantId = String;
pub type HostId = String;
pub type TransportId = String;

/// Credentials for a single session. Never logged, never placed in an
/// audit record or error.
#[derive(Clone)]
pub enum AuthMethod {
    Password(String),
    Key(Vec<u8>),
}

impl std::fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Password(_) => write!(f, "Password(<redacted>)"),
            AuthMethod::Key(_) => write!(f, "Key(<redacted>)"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ConnectionTarget {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthMethod,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Active,
    Inactive,
    Terminated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum CommandStatus {
    Success,
    Failed,
    Blocked,
}

/// Immutable once written.
#[derive(Clone, Debug, serde::Serialize)]
pub struct CommandRecord {
    pub session_id: SessionId,
    pub command_text: String,
    pub status: CommandStatus,
    pub output_capture: Option<String>,
    pub error_capture: Option<String>,
    pub exit_code: Option<i32>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub block_reason: Option<String>,
}

/// Bounded ring of completed `CommandRecord`s.
#[derive(Debug, Default)]
pub struct HistoryRing {
    cap: usize,
    entries: VecDeque<CommandRecord>,
}

impl HistoryRing {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            entries: VecDeque::with_capacity(cap.min(64)),
        }
    }

    pub fn push(&mut self, record: CommandRecord) {
        if self.entries.len() >= self.cap {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    /// Read paths take a snapshot rather than holding a live reference.
    pub fn snapshot(&self) -> Vec<CommandRecord> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u32,
    pub rows: u32,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// One operator's interactive shell on one host.
///
/// The mutable fields here (`command_buffer`, `command_history`, `state`,
/// `terminal_size`, `last_activity_at`, `transport_binding`) are guarded by
/// the per-session lock the registry hands out; the session never holds its
/// own lock on itself.
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub host_id: HostId,
    pub target: ConnectionTarget,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Instant,
    pub terminal_size: TerminalSize,
    pub transport_binding: Option<TransportId>,
    pub command_buffer: Vec<u8>,
    pub command_history: HistoryRing,
}

impl Session {
    pub fn new(
        user_id: UserId,
        tenant_id: TenantId,
        host_id: HostId,
        target: ConnectionTarget,
        transport_binding: Option<TransportId>,
        history_cap: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            tenant_id,
            host_id,
            target,
            state: SessionState::Pending,
            created_at: Utc::now(),
            last_activity_at: Instant::now(),
            terminal_size: TerminalSize::default(),
            transport_binding,
            command_buffer: Vec::new(),
            command_history: HistoryRing::new(history_cap),
        }
    }

    pub fn touch(&mut self) {
        let now = Instant::now();
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    pub fn is_idle(&self, idle_timeout: std::time::Duration) -> bool {
        self.last_activity_at.elapsed() >= idle_timeout
    }
}
