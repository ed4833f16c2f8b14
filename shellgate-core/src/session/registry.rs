use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::*;

use crate::error::RegistryError;
use crate::session::handle::{NullPumpHandle, PumpHandle};
use crate::session::types::{
    ConnectionTarget, HostId, Session, SessionId, SessionState, TenantId, TransportId, UserId,
};

#[derive(Clone, Debug, Default)]
pub struct RegistryStats {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub inactive: usize,
    pub terminated: usize,
}

struct Entry {
    session: Arc<Mutex<Session>>,
    pump: Arc<dyn PumpHandle>,
    user_id: UserId,
    host_id: HostId,
    /// Mirrors `Session::state`'s liveness for cap-counting without taking
    /// the per-session lock while the registry lock is held. Session::state
    /// remains the single source of truth; this is updated in lockstep by
    /// every registry method that transitions state.
    terminated: bool,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, Entry>,
    by_user: HashMap<UserId, HashSet<SessionId>>,
    by_host: HashMap<HostId, HashSet<SessionId>>,
    by_transport: HashMap<TransportId, SessionId>,
}

impl Inner {
    fn non_terminated_count(&self, user_id: &UserId) -> usize {
        self.by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.sessions
                            .get(*id)
                            .map(|e| !e.terminated)
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    fn unindex(&mut self, id: SessionId) {
        if let Some(entry) = self.sessions.remove(&id) {
            if let Some(ids) = self.by_user.get_mut(&entry.user_id) {
                ids.remove(&id);
            }
            if let Some(ids) = self.by_host.get_mut(&entry.host_id) {
                ids.remove(&id);
            }
            self.by_transport.retain(|_, sid| *sid != id);
        }
    }
}

/// Tracks live shell sessions, their ownership, and their lifecycle.
/// A single lock protects all three indexes; the per-session
/// lock inside each `Session` is only ever taken after the registry lock is
/// released or while it is still held, never the other way around (lock
/// order: registry -> session -> pool -> pool-entry).
pub struct SessionRegistry {
    inner: Mutex<Inner>,
    max_sessions_per_user: usize,
    history_cap: usize,
    idle_timeout_session: Duration,
}

impl SessionRegistry {
    pub fn new(max_sessions_per_user: usize, history_cap: usize, idle_timeout_session: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            max_sessions_per_user,
            history_cap,
            idle_timeout_session,
        })
    }

    /// Creates a new session. The pump is wired up separately by the Gateway
    /// Facade; callers that don't yet have one pass `NullPumpHandle`.
    pub async fn create(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        host_id: HostId,
        target: ConnectionTarget,
        transport_id: Option<TransportId>,
    ) -> Result<Arc<Mutex<Session>>, RegistryError> {
        let mut inner = self.inner.lock().await;

        if inner.non_terminated_count(&user_id) >= self.max_sessions_per_user {
            return Err(RegistryError::SessionLimitExceeded(self.max_sessions_per_user));
        }

        if let Some(ref tid) = transport_id {
            if inner.by_transport.contains_key(tid) {
                return Err(RegistryError::TransportAlreadyBound(tid.clone()));
            }
        }

        let session = Session::new(
            user_id.clone(),
            tenant_id,
            host_id.clone(),
            target,
            transport_id.clone(),
            self.history_cap,
        );
        let id = session.id;
        let session = Arc::new(Mutex::new(session));

        inner.sessions.insert(
            id,
            Entry {
                session: session.clone(),
                pump: Arc::new(NullPumpHandle),
                user_id: user_id.clone(),
                host_id: host_id.clone(),
                terminated: false,
            },
        );
        inner.by_user.entry(user_id).or_default().insert(id);
        inner.by_host.entry(host_id).or_default().insert(id);
        if let Some(tid) = transport_id {
            inner.by_transport.insert(tid, id);
        }

        debug!(session_id = %id, "session created");
        Ok(session)
    }

    /// Attaches the pump handle once the Gateway Facade has built it, and
    /// flips the session to `Active`.
    pub async fn attach_pump(&self, id: SessionId, pump: Arc<dyn PumpHandle>) -> Result<(), RegistryError> {
        let inner = self.inner.lock().await;
        let entry = inner.sessions.get(&id).ok_or(RegistryError::SessionNotFound(id))?;
        {
            let mut session = entry.session.lock().await;
            session.state = SessionState::Active;
        }
        // SAFETY-by-construction: Arc<dyn PumpHandle> swap needs &mut access;
        // take the lock a second time to get a mutable borrow of the entry.
        drop(inner);
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.sessions.get_mut(&id) {
            entry.pump = pump;
        }
        Ok(())
    }

    pub async fn lookup(&self, id: SessionId) -> Option<Arc<Mutex<Session>>> {
        let inner = self.inner.lock().await;
        inner.sessions.get(&id).map(|e| e.session.clone())
    }

    pub async fn lookup_by_transport(&self, transport_id: &str) -> Option<Arc<Mutex<Session>>> {
        let inner = self.inner.lock().await;
        let id = inner.by_transport.get(transport_id)?;
        inner.sessions.get(id).map(|e| e.session.clone())
    }

    /// Rebinds a session to a new transport: a reconnecting browser presents the same session
    /// id and is handed the binding back, provided the session hasn't been
    /// reaped yet.
    pub async fn rebind(&self, id: SessionId, new_transport_id: TransportId) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().await;
        if !inner.sessions.contains_key(&id) {
            return Err(RegistryError::SessionNotFound(id));
        }
        inner.by_transport.retain(|_, sid| *sid != id);
        inner.by_transport.insert(new_transport_id.clone(), id);
        drop(inner);

        let session = self.lookup(id).await.ok_or(RegistryError::SessionNotFound(id))?;
        let mut session = session.lock().await;
        session.transport_binding = Some(new_transport_id);
        session.state = SessionState::Active;
        session.touch();
        Ok(())
    }

    /// Transport layer calls this on browser disconnect. This
    /// does *not* terminate the session: Active -> Inactive, binding cleared,
    /// pump torn down, session kept around for a reconnect grace window.
    pub async fn on_transport_gone(&self, transport_id: &str) {
        let inner = self.inner.lock().await;
        let Some(&id) = inner.by_transport.get(transport_id) else {
            return;
        };
        let pump = inner.sessions.get(&id).map(|e| e.pump.clone());
        drop(inner);

        let mut inner = self.inner.lock().await;
        inner.by_transport.remove(transport_id);
        if let Some(session) = inner.sessions.get(&id).map(|e| e.session.clone()) {
            drop(inner);
            let mut session = session.lock().await;
            if session.state == SessionState::Active {
                session.state = SessionState::Inactive;
            }
            session.transport_binding = None;
        }

        if let Some(pump) = pump {
            pump.stop("browser disconnected").await;
        }
        info!(%transport_id, session_id = %id, "transport gone, session marked inactive");
    }

    pub async fn terminate_session(&self, id: SessionId, reason: &str) -> bool {
        let pump = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.sessions.get_mut(&id) else {
                return false;
            };
            entry.terminated = true;
            entry.pump.clone()
        };

        pump.stop(reason).await;

        if let Some(session) = self.lookup(id).await {
            let mut session = session.lock().await;
            session.state = SessionState::Terminated;
            session.transport_binding = None;
        }

        info!(session_id = %id, %reason, "session terminated");
        true
    }

    pub async fn terminate_for_user(&self, user_id: &str, reason: &str) -> usize {
        let ids: Vec<SessionId> = {
            let inner = self.inner.lock().await;
            inner
                .by_user
                .get(user_id)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default()
        };
        let mut count = 0;
        for id in ids {
            if self.terminate_session(id, reason).await {
                count += 1;
            }
        }
        count
    }

    pub async fn terminate_for_host(&self, host_id: &str, reason: &str) -> usize {
        let ids: Vec<SessionId> = {
            let inner = self.inner.lock().await;
            inner
                .by_host
                .get(host_id)
                .map(|s| s.iter().copied().collect())
                .unwrap_or_default()
        };
        let mut count = 0;
        for id in ids {
            if self.terminate_session(id, reason).await {
                count += 1;
            }
        }
        count
    }

    /// Drops the bookkeeping for a terminated session entirely. Called by
    /// the idle reaper once a session has sat `Terminated` past the grace
    /// window, and by tests that want a clean `Lookup` -> `None`.
    pub async fn forget(&self, id: SessionId) {
        let mut inner = self.inner.lock().await;
        inner.unindex(id);
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock().await;
        let mut stats = RegistryStats {
            total: inner.sessions.len(),
            ..Default::default()
        };
        for entry in inner.sessions.values() {
            let state = entry.session.lock().await.state;
            match state {
                SessionState::Pending => stats.pending += 1,
                SessionState::Active => stats.active += 1,
                SessionState::Inactive => stats.inactive += 1,
                SessionState::Terminated => stats.terminated += 1,
            }
        }
        stats
    }

    /// Background reaper: wakes every `reaper_interval` and
    /// terminates sessions idle longer than `idle_timeout_session`.
    pub async fn run_reaper(self: Arc<Self>, reaper_interval: Duration) {
        let mut ticker = tokio::time::interval(reaper_interval);
        loop {
            ticker.tick().await;
            let idle_ids: Vec<SessionId> = {
                let inner = self.inner.lock().await;
                let mut ids = Vec::new();
                for (id, entry) in inner.sessions.iter() {
                    if entry.terminated {
                        continue;
                    }
                    let session = entry.session.clone();
                    let idle_timeout = self.idle_timeout_session;
                    if let Ok(session) = session.try_lock() {
                        if session.is_idle(idle_timeout) {
                            ids.push(*id);
                        }
                    };
                }
                ids
            };
            for id in idle_ids {
                self.terminate_session(id, "idle timeout").await;
                self.forget(id).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_target() -> ConnectionTarget {
        ConnectionTarget {
            hostname: "h1".into(),
            port: 22,
            username: "root".into(),
            auth: crate::session::types::AuthMethod::Password("x".into()),
        }
    }

    #[tokio::test]
    async fn enforces_per_user_cap() {
        let registry = SessionRegistry::new(2, 100, Duration::from_secs(1800));
        registry
            .create("alice".into(), "t1".into(), "h1".into(), dummy_target(), None)
            .await
            .expect("first session");
        registry
            .create("alice".into(), "t1".into(), "h1".into(), dummy_target(), None)
            .await
            .expect("second session");
        let err = registry
            .create("alice".into(), "t1".into(), "h1".into(), dummy_target(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::SessionLimitExceeded(2)));
    }

    #[tokio::test]
    async fn terminate_frees_user_slot() {
        let registry = SessionRegistry::new(1, 100, Duration::from_secs(1800));
        let session = registry
            .create("bob".into(), "t1".into(), "h1".into(), dummy_target(), None)
            .await
            .expect("session");
        let id = session.lock().await.id;
        assert!(registry.terminate_session(id, "test").await);
        registry
            .create("bob".into(), "t1".into(), "h1".into(), dummy_target(), None)
            .await
            .expect("slot freed after terminate");
    }

    #[tokio::test]
    async fn on_transport_gone_marks_inactive_not_terminated() {
        let registry = SessionRegistry::new(5, 100, Duration::from_secs(1800));
        let session = registry
            .create(
                "carol".into(),
                "t1".into(),
                "h1".into(),
                dummy_target(),
                Some("ws-1".into()),
            )
            .await
            .expect("session");
        let id = session.lock().await.id;
        registry.attach_pump(id, Arc::new(NullPumpHandle)).await.unwrap();

        registry.on_transport_gone("ws-1").await;

        let session = registry.lookup(id).await.expect("still present");
        let session = session.lock().await;
        assert_eq!(session.state, SessionState::Inactive);
        assert!(session.transport_binding.is_none());
    }

    #[tokio::test]
    async fn rebind_after_transport_gone_stays_inactive_not_terminated() {
        let registry = SessionRegistry::new(5, 100, Duration::from_secs(1800));
        let session = registry
            .create(
                "dave".into(),
                "t1".into(),
                "h1".into(),
                dummy_target(),
                Some("ws-1".into()),
            )
            .await
            .expect("session");
        let id = session.lock().await.id;
        registry.on_transport_gone("ws-1").await;
        registry.rebind(id, "ws-2".into()).await.expect("rebind");

        registry.on_transport_gone("ws-2").await;
        let session = registry.lookup(id).await.expect("still present");
        assert_eq!(session.lock().await.state, SessionState::Inactive);
    }
}
