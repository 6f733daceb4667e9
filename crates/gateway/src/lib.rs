//! HTTP boundary of the gateway.
//!
//! Request flow: `[request-id | log] → (rate limiter) → handler →
//! SessionManager → ProtocolClient`. Route modules are thin; everything
//! stateful lives in the session, store and webhook crates and is reached
//! through [`state::AppState`].

pub mod account_routes;
pub mod chat_routes;
pub mod contact_routes;
pub mod error;
pub mod extract;
pub mod group_routes;
pub mod health;
pub mod media;
pub mod message_routes;
pub mod newsletter_routes;
pub mod rate_limit;
pub mod request_id;
pub mod server;
pub mod session_routes;
pub mod state;
