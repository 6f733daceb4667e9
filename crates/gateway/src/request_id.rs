use std::time::Instant;

use {
    axum::{
        extract::{FromRequestParts, Request},
        http::{HeaderValue, request::Parts},
        middleware::Next,
        response::Response,
    },
    tracing::{error, info},
    uuid::Uuid,
};

pub const HEADER: &str = "x-request-id";

/// Request id stored in request extensions by [`stamp`].
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Extractor handing the current request id to handlers.
#[derive(Debug, Clone)]
pub struct Rid(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Rid {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self(
            parts
                .extensions
                .get::<RequestId>()
                .map(|r| r.0.clone())
                .unwrap_or_default(),
        ))
    }
}

/// Outermost middleware: assign (or adopt) the request id, echo it back in
/// the response header, and write the structured request log line.
pub async fn stamp(mut request: Request, next: Next) -> Response {
    let rid = request
        .headers()
        .get(HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestId(rid.clone()));

    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let start = Instant::now();

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&rid) {
        response.headers_mut().insert(HEADER, value);
    }

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;
    wagate_metrics::counter!(
        wagate_metrics::http::REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
    wagate_metrics::histogram!(wagate_metrics::http::REQUEST_DURATION_SECONDS)
        .record(start.elapsed().as_secs_f64());

    if status >= 400 {
        error!(request_id = rid, %method, path, status, latency_ms, "http request");
    } else {
        info!(request_id = rid, %method, path, status, latency_ms, "http request");
    }

    response
}
