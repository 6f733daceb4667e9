use std::{collections::HashMap, sync::Arc, time::{Duration, Instant}};

use {
    thiserror::Error,
    tokio::sync::RwLock,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info},
};

use {
    wagate_client::{ClientError, ClientFactory},
    wagate_store::DeviceStore,
};

use crate::{events::EventRouter, managed::ManagedSession};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("device store error: {0}")]
    Store(anyhow::Error),

    #[error("failed to open protocol client: {0}")]
    Client(#[from] ClientError),

    #[error("session capacity reached ({0})")]
    Capacity(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionManagerConfig {
    pub idle_ttl: Duration,
    pub reap_interval: Duration,
    pub max_sessions: usize,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(6 * 3600),
            reap_interval: Duration::from_secs(15 * 60),
            max_sessions: 10_000,
        }
    }
}

/// Authoritative registry of managed sessions.
///
/// Guarantees one session per account id, runs the idle reaper, and drains
/// everything on shutdown. Locking is two-level: the registry map behind its
/// own `RwLock`, per-session fields behind each session's lock. Session
/// operations (disconnects, reaping) never run while holding the registry
/// lock.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<ManagedSession>>>,
    devices: Arc<dyn DeviceStore>,
    factory: Arc<dyn ClientFactory>,
    router: Arc<EventRouter>,
    config: SessionManagerConfig,
    cancel: CancellationToken,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        devices: Arc<dyn DeviceStore>,
        factory: Arc<dyn ClientFactory>,
        router: Arc<EventRouter>,
        config: SessionManagerConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            devices,
            factory,
            router,
            config,
            cancel: CancellationToken::new(),
        });
        manager.spawn_reaper();
        info!("session manager initialized");
        manager
    }

    /// The existing session for `account_id`, or a freshly created one.
    ///
    /// Creation resolves the account's device, opens a client bound to it,
    /// and registers the event router before the session becomes visible.
    /// Check-then-lock-then-recheck keeps N racing callers down to a single
    /// creation; everyone gets the same handle.
    pub async fn get_or_create(
        &self,
        account_id: &str,
    ) -> Result<Arc<ManagedSession>, SessionError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(account_id) {
                session.touch();
                return Ok(Arc::clone(session));
            }
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(account_id) {
            session.touch();
            return Ok(Arc::clone(session));
        }

        if sessions.len() >= self.config.max_sessions {
            return Err(SessionError::Capacity(self.config.max_sessions));
        }

        let device = self
            .devices
            .device_for(account_id)
            .await
            .map_err(SessionError::Store)?;
        let client = self.factory.open(&device.device_jid).await?;

        let session = ManagedSession::new(account_id, Arc::clone(&client));
        client.subscribe(self.router.attach(&session));
        sessions.insert(account_id.to_string(), Arc::clone(&session));
        wagate_metrics::counter!(wagate_metrics::session::CREATED_TOTAL).increment(1);

        info!(
            account_id,
            device_jid = device.device_jid,
            "created managed session"
        );
        Ok(session)
    }

    /// The session for `account_id`, if one is registered. Does not touch
    /// activity.
    pub async fn get(&self, account_id: &str) -> Option<Arc<ManagedSession>> {
        self.sessions.read().await.get(account_id).cloned()
    }

    /// Disconnect (best effort) and forget the session. Idempotent.
    pub async fn remove(&self, account_id: &str) {
        let session = self.sessions.write().await.remove(account_id);
        if let Some(session) = session {
            if session.client.is_connected() {
                session.client.disconnect().await;
            }
            session.set_connected(false);
            info!(account_id, "removed managed session");
        }
    }

    /// Shutdown drain: stop the reaper, disconnect every connected session.
    /// Safe to call more than once; each session is disconnected at most
    /// once because the connected flag drops with it.
    pub async fn disconnect_all(&self) {
        self.cancel.cancel();

        let sessions: Vec<Arc<ManagedSession>> =
            self.sessions.read().await.values().cloned().collect();
        let total = sessions.len();
        let mut disconnected = 0usize;
        for session in sessions {
            if session.is_connected() {
                session.client.disconnect().await;
                session.set_connected(false);
                disconnected += 1;
                debug!(account_id = session.account_id(), "disconnected session");
            }
        }
        info!(total, disconnected, "disconnected all sessions");
    }

    pub async fn client_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn connected_count(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|s| s.is_connected())
            .count()
    }

    /// One reaper pass as seen from `now`: disconnect sessions idle past the
    /// TTL but keep them registered so the next call reattaches cheaply.
    /// Returns the number disconnected.
    pub async fn reap_idle_at(&self, now: Instant) -> usize {
        let sessions: Vec<Arc<ManagedSession>> =
            self.sessions.read().await.values().cloned().collect();

        let mut reaped = 0usize;
        for session in sessions {
            if session.is_connected() && session.idle_for(now) >= self.config.idle_ttl {
                info!(account_id = session.account_id(), "disconnecting idle session");
                session.client.disconnect().await;
                session.set_connected(false);
                reaped += 1;
            }
        }
        if reaped > 0 {
            info!(reaped, "idle session sweep completed");
        }
        reaped
    }

    fn spawn_reaper(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.reap_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("idle reaper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        manager.reap_idle_at(Instant::now()).await;
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use {
        async_trait::async_trait,
        wagate_client::testing::ScriptedFactory,
        wagate_store::{DeviceRecord, SqliteDeviceStore},
        wagate_webhook::{Deliver, Envelope, error::Result as WebhookResult},
    };

    use super::*;

    struct NullSink;

    #[async_trait]
    impl Deliver for NullSink {
        async fn deliver(&self, _envelope: &Envelope) -> WebhookResult<()> {
            Ok(())
        }
    }

    async fn sqlite_store() -> Arc<SqliteDeviceStore> {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteDeviceStore::init(&pool).await.unwrap();
        Arc::new(SqliteDeviceStore::new(pool))
    }

    async fn harness(config: SessionManagerConfig) -> (Arc<SessionManager>, Arc<ScriptedFactory>) {
        let factory = ScriptedFactory::new();
        let router = EventRouter::new(Arc::new(NullSink));
        let manager = SessionManager::new(sqlite_store().await, factory.clone(), router, config);
        (manager, factory)
    }

    #[tokio::test]
    async fn one_session_per_account() {
        let (manager, _factory) = harness(SessionManagerConfig::default()).await;

        let first = manager.get_or_create("acct-1").await.unwrap();
        let second = manager.get_or_create("acct-1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(manager.client_count().await, 1);

        manager.get_or_create("acct-2").await.unwrap();
        assert_eq!(manager.client_count().await, 2);
    }

    #[tokio::test]
    async fn concurrent_creation_yields_one_session() {
        let (manager, _factory) = harness(SessionManagerConfig::default()).await;

        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move {
                manager.get_or_create("acct-1").await.unwrap()
            }));
        }

        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.unwrap());
        }
        assert!(sessions.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(manager.client_count().await, 1);
    }

    #[tokio::test]
    async fn device_resolution_failure_surfaces_as_store_error() {
        struct BrokenStore;

        #[async_trait]
        impl DeviceStore for BrokenStore {
            async fn device_for(&self, _account_id: &str) -> anyhow::Result<DeviceRecord> {
                anyhow::bail!("connection refused")
            }
            async fn mapping(&self, _account_id: &str) -> anyhow::Result<Option<DeviceRecord>> {
                anyhow::bail!("connection refused")
            }
            async fn delete_device(&self, _account_id: &str) -> anyhow::Result<()> {
                Ok(())
            }
            async fn ping(&self) -> anyhow::Result<()> {
                anyhow::bail!("connection refused")
            }
        }

        let factory = ScriptedFactory::new();
        let router = EventRouter::new(Arc::new(NullSink));
        let manager = SessionManager::new(
            Arc::new(BrokenStore),
            factory,
            router,
            SessionManagerConfig::default(),
        );

        let err = manager.get_or_create("acct-1").await.unwrap_err();
        assert!(matches!(err, SessionError::Store(_)));
        assert_eq!(manager.client_count().await, 0);
    }

    #[tokio::test]
    async fn capacity_limit_rejects_new_accounts() {
        let (manager, _factory) = harness(SessionManagerConfig {
            max_sessions: 2,
            ..Default::default()
        })
        .await;

        manager.get_or_create("acct-1").await.unwrap();
        manager.get_or_create("acct-2").await.unwrap();

        let err = manager.get_or_create("acct-3").await.unwrap_err();
        assert!(matches!(err, SessionError::Capacity(2)));

        // Existing accounts are unaffected.
        manager.get_or_create("acct-1").await.unwrap();
    }

    #[tokio::test]
    async fn remove_disconnects_and_forgets() {
        let (manager, factory) = harness(SessionManagerConfig::default()).await;

        let session = manager.get_or_create("acct-1").await.unwrap();
        session.client.connect().await.unwrap();
        assert!(session.is_connected());

        let device_jid = factory.opened_devices().pop().unwrap();
        manager.remove("acct-1").await;
        assert_eq!(manager.client_count().await, 0);
        assert_eq!(factory.client(&device_jid).disconnect_count(), 1);

        // Idempotent.
        manager.remove("acct-1").await;
    }

    #[tokio::test]
    async fn idle_sessions_reaped_but_stay_registered() {
        let config = SessionManagerConfig {
            idle_ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let (manager, factory) = harness(config).await;

        let session = manager.get_or_create("acct-1").await.unwrap();
        session.client.connect().await.unwrap();
        assert_eq!(manager.connected_count().await, 1);

        // Not idle yet.
        assert_eq!(manager.reap_idle_at(Instant::now()).await, 0);

        // Past the TTL: disconnected, registry entry retained.
        let later = Instant::now() + Duration::from_secs(120);
        assert_eq!(manager.reap_idle_at(later).await, 1);
        assert_eq!(manager.connected_count().await, 0);
        assert_eq!(manager.client_count().await, 1);

        let device_jid = factory.opened_devices().pop().unwrap();
        assert_eq!(factory.client(&device_jid).disconnect_count(), 1);
    }

    #[tokio::test]
    async fn background_reaper_evicts_with_short_ttl() {
        let config = SessionManagerConfig {
            idle_ttl: Duration::from_millis(50),
            reap_interval: Duration::from_millis(25),
            max_sessions: 10,
        };
        let (manager, _factory) = harness(config).await;

        let session = manager.get_or_create("acct-1").await.unwrap();
        session.client.connect().await.unwrap();
        assert_eq!(manager.connected_count().await, 1);

        tokio::time::timeout(Duration::from_secs(2), async {
            while manager.connected_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("reaper never evicted the idle session");
        assert_eq!(manager.client_count().await, 1);
    }

    #[tokio::test]
    async fn disconnect_all_drains_every_session_exactly_once() {
        let (manager, factory) = harness(SessionManagerConfig::default()).await;

        for account in ["acct-1", "acct-2", "acct-3"] {
            let session = manager.get_or_create(account).await.unwrap();
            session.client.connect().await.unwrap();
        }
        assert_eq!(manager.connected_count().await, 3);

        manager.disconnect_all().await;
        assert_eq!(manager.connected_count().await, 0);

        for device_jid in factory.opened_devices() {
            assert_eq!(factory.client(&device_jid).disconnect_count(), 1);
        }

        // Second drain is a no-op.
        manager.disconnect_all().await;
        for device_jid in factory.opened_devices() {
            assert_eq!(factory.client(&device_jid).disconnect_count(), 1);
        }
    }
}
