//! Metric name definitions.
//!
//! All names used by the gateway live here so the exported surface is
//! documented in one place.

/// HTTP request metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "wagate_http_requests_total";
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "wagate_http_request_duration_seconds";
}

/// Session registry metrics
pub mod session {
    /// Total number of managed sessions created
    pub const CREATED_TOTAL: &str = "wagate_sessions_created_total";
    /// Number of sessions currently registered
    pub const REGISTERED: &str = "wagate_sessions_registered";
    /// Number of sessions currently connected
    pub const CONNECTED: &str = "wagate_sessions_connected";
}

/// Outbound send metrics
pub mod send {
    /// Total messages accepted for sending
    pub const MESSAGES_TOTAL: &str = "wagate_send_messages_total";
    /// Sends rejected by the per-account rate limiter
    pub const RATE_LIMITED_TOTAL: &str = "wagate_send_rate_limited_total";
    /// Sends collapsed by the idempotency store
    pub const DUPLICATE_TOTAL: &str = "wagate_send_duplicate_total";
    /// Sends that failed upstream
    pub const FAILED_TOTAL: &str = "wagate_send_failed_total";
}

/// Webhook delivery metrics
pub mod webhook {
    /// Envelopes queued for delivery
    pub const QUEUED_TOTAL: &str = "wagate_webhook_queued_total";
    /// Envelopes dropped on queue overflow
    pub const DROPPED_TOTAL: &str = "wagate_webhook_dropped_total";
}
