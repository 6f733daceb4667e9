//! Signed webhook delivery to the tenant sink.
//!
//! Envelopes are serialized once, signed with HMAC-SHA256 over those exact
//! bytes, and POSTed to `base_url + "/" + event_type`. Per-session
//! [`DeliveryQueue`]s decouple delivery from event processing: a slow tenant
//! sink never stalls the upstream event stream.

pub mod envelope;
pub mod error;
pub mod queue;
pub mod sender;

pub use {
    envelope::Envelope,
    error::{Error, Result},
    queue::DeliveryQueue,
    sender::{Deliver, RetryPolicy, Sender, verify_signature},
};
