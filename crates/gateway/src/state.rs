use std::sync::Arc;

use {
    wagate_config::Config,
    wagate_metrics::MetricsHandle,
    wagate_session::{IdempotencyStore, ManagedSession, SessionManager},
    wagate_store::SqliteDeviceStore,
    wagate_webhook::Sender,
};

use crate::{error::ApiError, rate_limit::SendRateLimiter, request_id::Rid};

/// Shared application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub devices: Arc<SqliteDeviceStore>,
    pub webhooks: Arc<Sender>,
    pub idempotency: Arc<IdempotencyStore>,
    pub send_limiter: Arc<SendRateLimiter>,
    pub metrics: MetricsHandle,
    /// Client for tenant-supplied media URLs.
    pub http: reqwest::Client,
}

impl AppState {
    /// The managed session for an account, surfacing acquisition failures as
    /// `client_error`.
    pub async fn session(
        &self,
        account_id: &str,
        rid: &Rid,
    ) -> Result<Arc<ManagedSession>, ApiError> {
        self.sessions
            .get_or_create(account_id)
            .await
            .map_err(|err| ApiError::from(err).rid(rid))
    }
}
