//! Upstream protocol capability.
//!
//! The gateway never speaks the messaging network's wire format itself; it
//! consumes a connected, end-to-end-encrypted session through the
//! [`ProtocolClient`] trait. A concrete implementation owns the socket and
//! crypto state; everything above it (session registry, event routing, HTTP
//! handlers) is written against this boundary.
//!
//! A scripted in-memory client for consumers' test suites lives in the
//! `testing` module, compiled only under the `testing` feature so the
//! double never reaches a shipped binary.

pub mod error;
pub mod noop;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

pub use error::{Error as ClientError, Result as ClientResult};
pub use types::*;

/// Receives the upstream event stream for one session.
///
/// Implementations must be cheap to call; the client delivers events one at a
/// time and awaits each `handle` call, which is what gives consumers their
/// per-session ordering guarantee.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: ProtocolEvent);
}

/// A live (or connectable) session with the upstream messaging network.
///
/// One instance per paired device. All operations take a deadline from the
/// caller's context; implementations are expected to fail with
/// [`ClientError::Timeout`] rather than block indefinitely.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    // ── Connection ──────────────────────────────────────────────────────────

    fn is_connected(&self) -> bool;
    fn is_logged_in(&self) -> bool;
    /// The JID this device is paired as, if pairing has completed.
    fn self_jid(&self) -> Option<Jid>;

    async fn connect(&self) -> ClientResult<()>;
    async fn disconnect(&self);
    /// Log out and invalidate the device credentials upstream.
    async fn logout(&self) -> ClientResult<()>;

    /// Register the handler receiving this session's event stream.
    /// Replaces any previously registered handler.
    fn subscribe(&self, handler: Arc<dyn EventHandler>);

    // ── Pairing ─────────────────────────────────────────────────────────────

    /// Begin QR pairing. Updates (codes, success, timeout) arrive on the
    /// returned channel; the caller is expected to also call [`connect`].
    ///
    /// [`connect`]: ProtocolClient::connect
    async fn start_qr_pairing(&self) -> ClientResult<mpsc::Receiver<PairingUpdate>>;

    /// Request a phone-number pairing code.
    async fn pair_phone(&self, phone_number: &str) -> ClientResult<String>;

    // ── Messaging ───────────────────────────────────────────────────────────

    async fn send(&self, to: &Jid, content: OutgoingContent) -> ClientResult<SendReceipt>;
    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> ClientResult<UploadedMedia>;
    async fn mark_read(
        &self,
        chat: &Jid,
        sender: &Jid,
        message_ids: &[String],
        timestamp: i64,
    ) -> ClientResult<()>;
    async fn send_presence(&self, state: PresenceState) -> ClientResult<()>;
    async fn send_chat_presence(&self, chat: &Jid, state: ChatPresenceState) -> ClientResult<()>;

    // ── Groups ──────────────────────────────────────────────────────────────

    async fn joined_groups(&self) -> ClientResult<Vec<GroupSnapshot>>;
    async fn create_group(&self, subject: &str, participants: &[Jid])
        -> ClientResult<GroupSnapshot>;
    async fn join_group_with_link(&self, invite_code: &str) -> ClientResult<Jid>;
    async fn group_invite_preview(&self, invite_code: &str) -> ClientResult<GroupSnapshot>;
    async fn group_info(&self, group: &Jid) -> ClientResult<GroupSnapshot>;
    /// Apply one membership change to a set of users; returns the JIDs the
    /// upstream acknowledged.
    async fn update_participants(
        &self,
        group: &Jid,
        users: &[Jid],
        change: ParticipantChange,
    ) -> ClientResult<Vec<Jid>>;
    async fn set_group_name(&self, group: &Jid, name: &str) -> ClientResult<()>;
    async fn set_group_topic(&self, group: &Jid, topic: &str) -> ClientResult<()>;
    async fn set_group_locked(&self, group: &Jid, locked: bool) -> ClientResult<()>;
    async fn set_group_announce(&self, group: &Jid, announce: bool) -> ClientResult<()>;
    /// Returns the new picture id.
    async fn set_group_photo(&self, group: &Jid, jpeg: Vec<u8>) -> ClientResult<String>;
    async fn group_invite_link(&self, group: &Jid, reset: bool) -> ClientResult<String>;
    async fn leave_group(&self, group: &Jid) -> ClientResult<()>;

    // ── Account ─────────────────────────────────────────────────────────────

    async fn avatar(&self, jid: &Jid, preview: bool) -> ClientResult<Option<AvatarInfo>>;
    /// Returns the new picture id.
    async fn set_avatar(&self, jpeg: Vec<u8>) -> ClientResult<String>;
    async fn set_push_name(&self, name: &str) -> ClientResult<()>;
    async fn set_status_message(&self, status: &str) -> ClientResult<()>;
    async fn user_info(&self, jids: &[Jid]) -> ClientResult<Vec<UserInfo>>;
    async fn business_profile(&self, jid: &Jid) -> ClientResult<Option<BusinessProfile>>;
    async fn privacy_settings(&self) -> ClientResult<PrivacySettings>;
    /// Check which phone numbers are registered on the network.
    async fn check_users(&self, phones: &[String]) -> ClientResult<Vec<UserCheck>>;

    // ── Chats, contacts, newsletters ────────────────────────────────────────

    async fn contacts(&self) -> ClientResult<Vec<ContactEntry>>;
    async fn pin_chat(&self, chat: &Jid, pinned: bool) -> ClientResult<()>;
    async fn archive_chat(&self, chat: &Jid, archived: bool) -> ClientResult<()>;
    /// `None` unmutes; `Some(MuteDuration::Permanent)` uses the protocol's
    /// native permanent flag rather than a far-future sentinel.
    async fn mute_chat(&self, chat: &Jid, mute: Option<MuteDuration>) -> ClientResult<()>;
    async fn subscribed_newsletters(&self) -> ClientResult<Vec<NewsletterSnapshot>>;
}

/// Opens protocol clients for persisted device identities.
///
/// The session manager resolves a device through the device store, then asks
/// the factory for a client bound to it.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn open(&self, device_jid: &str) -> ClientResult<Arc<dyn ProtocolClient>>;
}
