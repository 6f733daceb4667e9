use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    axum::{
        body::{Body, Bytes},
        extract::{Request, State},
        http::StatusCode,
        middleware::Next,
        response::{IntoResponse, Json, Response},
    },
    dashmap::{DashMap, mapref::entry::Entry},
    rand::Rng,
    serde::Deserialize,
    tokio_util::sync::CancellationToken,
    tracing::debug,
};

use crate::{request_id::RequestId, state::AppState};

/// Refill window for the minute-window bucket.
const WINDOW: Duration = Duration::from_secs(60);
/// Buckets untouched this long are swept.
const BUCKET_TTL: Duration = Duration::from_secs(10 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Upper bound on buffered request bodies. Media travels by URL, so real
/// payloads stay far below this.
const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied { retry_after: u64 },
}

/// Per-account admission for outbound-producing endpoints.
///
/// A capacity-C bucket per account, refilled in full every 60 seconds — no
/// partial accrual. Admission decrements one token; an empty bucket denies
/// with `retry_after = 60`.
pub struct SendRateLimiter {
    buckets: DashMap<String, Bucket>,
    capacity: u32,
    jitter_min_ms: u64,
    jitter_max_ms: u64,
}

impl SendRateLimiter {
    #[must_use]
    pub fn new(capacity: u32, jitter_min_ms: u64, jitter_max_ms: u64) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity,
            jitter_min_ms,
            jitter_max_ms,
        }
    }

    pub fn allow(&self, account_id: &str) -> Decision {
        self.allow_at(account_id, Instant::now())
    }

    fn allow_at(&self, account_id: &str, now: Instant) -> Decision {
        if self.capacity == 0 {
            return Decision::Denied {
                retry_after: WINDOW.as_secs(),
            };
        }

        match self.buckets.entry(account_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                if now.duration_since(bucket.last_refill) >= WINDOW {
                    bucket.tokens = self.capacity;
                    bucket.last_refill = now;
                }
                if bucket.tokens > 0 {
                    bucket.tokens -= 1;
                    Decision::Allowed
                } else {
                    Decision::Denied {
                        retry_after: WINDOW.as_secs(),
                    }
                }
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Bucket {
                    tokens: self.capacity - 1,
                    last_refill: now,
                });
                Decision::Allowed
            },
        }
    }

    /// Uniform anti-burst delay in `[jitter_min_ms, jitter_max_ms)`; zero
    /// when the range is empty.
    #[must_use]
    pub fn jitter(&self) -> Duration {
        if self.jitter_max_ms > self.jitter_min_ms {
            let ms = rand::thread_rng().gen_range(self.jitter_min_ms..self.jitter_max_ms);
            Duration::from_millis(ms)
        } else {
            Duration::ZERO
        }
    }

    /// Drop buckets whose last refill is older than ten minutes.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.last_refill) < BUCKET_TTL);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "rate bucket sweep completed");
        }
        removed
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        limiter.sweep_at(Instant::now());
                    }
                }
            }
        });
    }
}

#[derive(Deserialize)]
struct AccountField {
    #[serde(default)]
    wa_account_id: String,
}

fn reject(request_id: &str, status: StatusCode, body: serde_json::Value) -> Response {
    let mut body = body;
    body["request_id"] = request_id.into();
    (status, Json(body)).into_response()
}

/// Admission middleware for send-path endpoints.
///
/// Buffers the body, pulls `wa_account_id` out of it, and re-exposes the
/// exact original bytes to the handler — downstream parsing sees the
/// complete payload. On admit, sleeps the anti-burst jitter before running
/// the handler.
pub async fn admit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_default();

    let (parts, body) = request.into_parts();
    let bytes: Bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return reject(
                &request_id,
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "invalid_request",
                    "message": "failed to read request body",
                }),
            );
        },
    };

    let account: AccountField = match serde_json::from_slice(&bytes) {
        Ok(account) => account,
        Err(_) => {
            return reject(
                &request_id,
                StatusCode::BAD_REQUEST,
                serde_json::json!({
                    "error": "invalid_request",
                    "message": "invalid JSON payload",
                }),
            );
        },
    };

    if account.wa_account_id.is_empty() {
        return reject(
            &request_id,
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "invalid_request",
                "message": "wa_account_id is required",
            }),
        );
    }

    if let Decision::Denied { retry_after } = state.send_limiter.allow(&account.wa_account_id) {
        wagate_metrics::counter!(wagate_metrics::send::RATE_LIMITED_TOTAL).increment(1);
        debug!(
            account_id = account.wa_account_id,
            "send rejected by rate limiter"
        );
        return reject(
            &request_id,
            StatusCode::TOO_MANY_REQUESTS,
            serde_json::json!({
                "error": "rate_limit_exceeded",
                "message": "Too many messages sent. Please wait before sending more.",
                "retry_after": retry_after,
            }),
        );
    }

    let jitter = state.send_limiter.jitter();
    if !jitter.is_zero() {
        tokio::time::sleep(jitter).await;
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    next.run(request).await
}
