use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

use crate::session::{CommandStatus, HostId, SessionId, TenantId, UserId};

/// One record per command submission or block event.
#[derive(Clone, Debug, serde::Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub host_id: HostId,
    pub session_id: SessionId,
    pub command_text: String,
    pub status: CommandStatus,
    pub block_reason: Option<String>,
    pub output_capture: Option<String>,
    pub error_capture: Option<String>,
    pub exit_code: Option<i32>,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub ip_address: Option<String>,
}

/// Implemented by the concrete sink (stdout/file/remote collector). The
/// queue in front of this never blocks a producer.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn write(&self, record: AuditRecord);
}

struct Shared {
    queue: StdMutex<VecDeque<AuditRecord>>,
    capacity: usize,
    notify: Notify,
}

/// Buffers records in a bounded in-memory queue so producers (the pump's
/// input forwarder) never block on a slow sink. When the buffer is full,
/// the oldest queued record is dropped (not the one just submitted) and a
/// warning logged.
pub struct BufferedAuditSink {
    shared: Arc<Shared>,
}

impl BufferedAuditSink {
    pub fn new(sink: impl AuditSink + 'static, capacity: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: StdMutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            notify: Notify::new(),
        });

        let drain_shared = shared.clone();
        tokio::spawn(async move {
            loop {
                let next = drain_shared.queue.lock().expect("audit queue lock poisoned").pop_front();
                match next {
                    Some(record) => sink.write(record).await,
                    None => drain_shared.notify.notified().await,
                }
            }
        });

        Self { shared }
    }

    /// Never blocks: on a full queue, drops the oldest queued record and
    /// logs a warning rather than back-pressuring the caller.
    pub fn append(&self, record: AuditRecord) {
        let mut queue = self.shared.queue.lock().expect("audit queue lock poisoned");
        if queue.len() >= self.shared.capacity {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    session_id = %dropped.session_id,
                    "audit queue full, dropping oldest in-flight record"
                );
            }
        }
        queue.push_back(record);
        drop(queue);
        self.shared.notify.notify_one();
    }
}

/// Development/fallback sink that writes structured log lines. Not meant
/// for production audit trails (no durability guarantee), but keeps the
/// gateway usable with no external sink configured.
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn write(&self, record: AuditRecord) {
        tracing::info!(
            audit_id = %record.id,
            session_id = %record.session_id,
            user_id = %record.user_id,
            host_id = %record.host_id,
            status = ?record.status,
            command = %record.command_text,
            "audit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl AuditSink for CountingSink {
        async fn write(&self, _record: AuditRecord) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sample_record() -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            tenant_id: "t1".into(),
            user_id: "alice".into(),
            host_id: "h1".into(),
            session_id: Uuid::new_v4(),
            command_text: "ls".into(),
            status: CommandStatus::Success,
            block_reason: None,
            output_capture: None,
            error_capture: None,
            exit_code: None,
            executed_at: Utc::now(),
            duration_ms: 1,
            ip_address: None,
        }
    }

    #[tokio::test]
    async fn appended_records_reach_the_sink() {
        let counter = Arc::new(AtomicUsize::new(0));
        let sink = BufferedAuditSink::new(CountingSink(counter.clone()), 8);
        sink.append(sample_record());
        sink.append(sample_record());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
