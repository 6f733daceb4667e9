use std::time::Duration;

use {
    async_trait::async_trait,
    hmac::{Hmac, Mac},
    sha2::Sha256,
    tracing::{info, warn},
};

use crate::{
    envelope::Envelope,
    error::{Context, Error, Result},
};

type HmacSha256 = Hmac<Sha256>;

/// How failed deliveries are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// Delivery capability consumed by the queues; [`Sender`] is the production
/// implementation.
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(&self, envelope: &Envelope) -> Result<()>;
}

/// Signs and POSTs envelopes to the tenant sink.
pub struct Sender {
    base_url: String,
    signing_secret: String,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl Sender {
    pub fn new(
        base_url: &str,
        signing_secret: &str,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build webhook HTTP client")?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            signing_secret: signing_secret.to_string(),
            http,
            retry,
        })
    }

    /// `sha256=<hex(HMAC-SHA256(secret, data))>` over the exact bytes sent.
    #[must_use]
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(data);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    async fn post_once(&self, url: &str, body: &[u8], envelope: &Envelope) -> Result<()> {
        let response = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-WA-Signature", self.sign(body))
            .header("X-Request-ID", &envelope.request_id)
            .body(body.to_vec())
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() < 300 {
            info!(
                url,
                event_type = envelope.event_type,
                status = status.as_u16(),
                "webhook delivered"
            );
            Ok(())
        } else {
            warn!(
                url,
                event_type = envelope.event_type,
                status = status.as_u16(),
                "webhook returned non-2xx status"
            );
            Err(Error::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl Deliver for Sender {
    /// Deliver one envelope, retrying transient failures with exponential
    /// backoff. Returns the last error once retries are exhausted.
    async fn deliver(&self, envelope: &Envelope) -> Result<()> {
        let body = serde_json::to_vec(envelope).context("failed to serialize envelope")?;
        let url = format!("{}/{}", self.base_url, envelope.event_type);

        let mut attempt = 0u32;
        loop {
            match self.post_once(&url, &body, envelope).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.retry.max_retries && is_retryable(&err) => {
                    let delay = self.retry.backoff_base * 2u32.saturating_pow(attempt);
                    warn!(
                        url,
                        event_type = envelope.event_type,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying webhook delivery"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                },
                Err(err) => return Err(err),
            }
        }
    }
}

/// Network failures and 5xx/408/429 are worth retrying; other 4xx means the
/// sink understood us and said no.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Http(_) => true,
        Error::Status(status) => *status >= 500 || *status == 408 || *status == 429,
        Error::Message(_) => false,
    }
}

/// Verify a signature header produced by [`Sender::sign`].
///
/// For the sink side (and tests): recomputes the MAC over the received body
/// and compares it against the `sha256=<hex>` header value.
#[must_use]
pub fn verify_signature(body: &[u8], signature_header: &str, secret: &str) -> bool {
    let Some(provided_hex) = signature_header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    digests_match(computed.as_slice(), provided_hex)
}

/// Compare a computed digest against a hex-encoded one without an early
/// exit on the first differing byte, so a forged header cannot be probed
/// byte by byte through response timing.
fn digests_match(computed: &[u8], provided_hex: &str) -> bool {
    let Ok(provided) = hex::decode(provided_hex) else {
        return false;
    };
    if provided.len() != computed.len() {
        return false;
    }
    let mut diff = 0u8;
    for (ours, theirs) in computed.iter().zip(&provided) {
        diff |= ours ^ theirs;
    }
    diff == 0
}
