use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use wagate_client::ProtocolClient;

struct SessionState {
    connected: bool,
    last_activity: Instant,
}

/// In-memory record wrapping one live upstream client.
///
/// The registry holds these behind `Arc`; the mutable fields sit behind their
/// own lock so touching one session never contends with the registry or with
/// other accounts. `connected` tracks the event stream (driven by the event
/// router and the reaper), not the client's instantaneous socket state.
pub struct ManagedSession {
    account_id: String,
    pub client: Arc<dyn ProtocolClient>,
    state: RwLock<SessionState>,
}

impl std::fmt::Debug for ManagedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedSession")
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl ManagedSession {
    #[must_use]
    pub fn new(account_id: &str, client: Arc<dyn ProtocolClient>) -> Arc<Self> {
        Arc::new(Self {
            account_id: account_id.to_string(),
            client,
            state: RwLock::new(SessionState {
                connected: false,
                last_activity: Instant::now(),
            }),
        })
    }

    #[must_use]
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// Stamp activity now. Called for every inbound event and every outbound
    /// operation this session originates.
    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, now: Instant) {
        self.state.write().unwrap().last_activity = now;
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.write().unwrap().connected = connected;
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.read().unwrap().connected
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.state.read().unwrap().last_activity
    }

    /// Time since the last activity stamp, as seen from `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, wagate_client::testing::ScriptedClient};

    #[test]
    fn starts_disconnected_with_fresh_activity() {
        let session = ManagedSession::new("acct-1", ScriptedClient::new("dev-1"));
        assert!(!session.is_connected());
        assert!(session.idle_for(Instant::now()) < Duration::from_secs(1));
    }

    #[test]
    fn touch_resets_idle_clock() {
        let session = ManagedSession::new("acct-1", ScriptedClient::new("dev-1"));
        let later = Instant::now() + Duration::from_secs(100);
        assert!(session.idle_for(later) >= Duration::from_secs(99));

        session.touch_at(later);
        assert_eq!(session.idle_for(later), Duration::ZERO);
    }

    #[test]
    fn connected_flag_round_trips() {
        let session = ManagedSession::new("acct-1", ScriptedClient::new("dev-1"));
        session.set_connected(true);
        assert!(session.is_connected());
        session.set_connected(false);
        assert!(!session.is_connected());
    }
}
