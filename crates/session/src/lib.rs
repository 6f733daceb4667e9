//! Session lifecycle and the control plane around it.
//!
//! One [`ManagedSession`] per tenant account, owned by the
//! [`SessionManager`] registry. The manager runs the idle reaper and the
//! shutdown drain; the [`EventRouter`] turns each session's upstream event
//! stream into signed webhook deliveries; the [`IdempotencyStore`] collapses
//! client retry storms on the send path.

pub mod events;
pub mod idempotency;
pub mod managed;
pub mod manager;

pub use {
    events::EventRouter,
    idempotency::IdempotencyStore,
    managed::ManagedSession,
    manager::{SessionManager, SessionManagerConfig, SessionError},
};
