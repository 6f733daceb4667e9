//! Placeholder protocol backend.
//!
//! Used when the gateway is built without a concrete protocol
//! implementation: sessions register and report their state, but every
//! network-touching operation fails with a clear error. Mirrors the shape a
//! real backend crate plugs into.

use std::sync::Arc;

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    ClientFactory, ClientResult, EventHandler, ProtocolClient,
    error::Error,
    types::*,
};

pub struct NoopClient;

impl NoopClient {
    fn unavailable<T>() -> ClientResult<T> {
        Err(Error::Protocol(
            "no protocol backend compiled into this build".into(),
        ))
    }
}

#[async_trait]
impl ProtocolClient for NoopClient {
    fn is_connected(&self) -> bool {
        false
    }

    fn is_logged_in(&self) -> bool {
        false
    }

    fn self_jid(&self) -> Option<Jid> {
        None
    }

    async fn connect(&self) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn disconnect(&self) {}

    async fn logout(&self) -> ClientResult<()> {
        Self::unavailable()
    }

    fn subscribe(&self, _handler: Arc<dyn EventHandler>) {}

    async fn start_qr_pairing(&self) -> ClientResult<mpsc::Receiver<PairingUpdate>> {
        Self::unavailable()
    }

    async fn pair_phone(&self, _phone_number: &str) -> ClientResult<String> {
        Self::unavailable()
    }

    async fn send(&self, _to: &Jid, _content: OutgoingContent) -> ClientResult<SendReceipt> {
        Self::unavailable()
    }

    async fn upload(&self, _data: Vec<u8>, _kind: MediaKind) -> ClientResult<UploadedMedia> {
        Self::unavailable()
    }

    async fn mark_read(
        &self,
        _chat: &Jid,
        _sender: &Jid,
        _message_ids: &[String],
        _timestamp: i64,
    ) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn send_presence(&self, _state: PresenceState) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn send_chat_presence(
        &self,
        _chat: &Jid,
        _state: ChatPresenceState,
    ) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn joined_groups(&self) -> ClientResult<Vec<GroupSnapshot>> {
        Self::unavailable()
    }

    async fn create_group(
        &self,
        _subject: &str,
        _participants: &[Jid],
    ) -> ClientResult<GroupSnapshot> {
        Self::unavailable()
    }

    async fn join_group_with_link(&self, _invite_code: &str) -> ClientResult<Jid> {
        Self::unavailable()
    }

    async fn group_invite_preview(&self, _invite_code: &str) -> ClientResult<GroupSnapshot> {
        Self::unavailable()
    }

    async fn group_info(&self, _group: &Jid) -> ClientResult<GroupSnapshot> {
        Self::unavailable()
    }

    async fn update_participants(
        &self,
        _group: &Jid,
        _users: &[Jid],
        _change: ParticipantChange,
    ) -> ClientResult<Vec<Jid>> {
        Self::unavailable()
    }

    async fn set_group_name(&self, _group: &Jid, _name: &str) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn set_group_topic(&self, _group: &Jid, _topic: &str) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn set_group_locked(&self, _group: &Jid, _locked: bool) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn set_group_announce(&self, _group: &Jid, _announce: bool) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn set_group_photo(&self, _group: &Jid, _jpeg: Vec<u8>) -> ClientResult<String> {
        Self::unavailable()
    }

    async fn group_invite_link(&self, _group: &Jid, _reset: bool) -> ClientResult<String> {
        Self::unavailable()
    }

    async fn leave_group(&self, _group: &Jid) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn avatar(&self, _jid: &Jid, _preview: bool) -> ClientResult<Option<AvatarInfo>> {
        Self::unavailable()
    }

    async fn set_avatar(&self, _jpeg: Vec<u8>) -> ClientResult<String> {
        Self::unavailable()
    }

    async fn set_push_name(&self, _name: &str) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn set_status_message(&self, _status: &str) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn user_info(&self, _jids: &[Jid]) -> ClientResult<Vec<UserInfo>> {
        Self::unavailable()
    }

    async fn business_profile(&self, _jid: &Jid) -> ClientResult<Option<BusinessProfile>> {
        Self::unavailable()
    }

    async fn privacy_settings(&self) -> ClientResult<PrivacySettings> {
        Self::unavailable()
    }

    async fn check_users(&self, _phones: &[String]) -> ClientResult<Vec<UserCheck>> {
        Self::unavailable()
    }

    async fn contacts(&self) -> ClientResult<Vec<ContactEntry>> {
        Self::unavailable()
    }

    async fn pin_chat(&self, _chat: &Jid, _pinned: bool) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn archive_chat(&self, _chat: &Jid, _archived: bool) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn mute_chat(&self, _chat: &Jid, _mute: Option<MuteDuration>) -> ClientResult<()> {
        Self::unavailable()
    }

    async fn subscribed_newsletters(&self) -> ClientResult<Vec<NewsletterSnapshot>> {
        Self::unavailable()
    }
}

/// Factory for [`NoopClient`]s.
#[derive(Default)]
pub struct NoopFactory;

#[async_trait]
impl ClientFactory for NoopFactory {
    async fn open(&self, _device_jid: &str) -> ClientResult<Arc<dyn ProtocolClient>> {
        Ok(Arc::new(NoopClient))
    }
}
