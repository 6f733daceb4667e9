//! Scripted in-memory protocol client.
//!
//! Drives the gateway in tests without a network: state flags are plain
//! atomics, every outbound call is recorded, and `emit` pushes events through
//! the registered handler exactly the way a real session delivers them
//! (sequentially, awaiting each one).

use std::sync::{
    Arc, Mutex, RwLock,
    atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    ClientFactory, ClientResult, EventHandler, ProtocolClient,
    error::Error,
    types::{
        AvatarInfo, BusinessProfile, ChatPresenceState, ContactEntry, GroupSnapshot, Jid,
        MediaKind, MuteDuration, NewsletterSnapshot, OutgoingContent, PairingUpdate,
        ParticipantChange, PresenceState, PrivacySettings, ProtocolEvent, SendReceipt,
        UploadedMedia, UserCheck, UserInfo,
    },
};

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// One recorded outbound send.
#[derive(Debug, Clone)]
pub struct RecordedSend {
    pub to: Jid,
    pub content: OutgoingContent,
}

#[derive(Debug, Clone)]
pub struct RecordedRead {
    pub chat: Jid,
    pub message_ids: Vec<String>,
}

#[derive(Default)]
struct Script {
    qr_updates: Vec<PairingUpdate>,
    pair_code: Option<String>,
    groups: Vec<GroupSnapshot>,
    contacts: Vec<ContactEntry>,
    newsletters: Vec<NewsletterSnapshot>,
}

/// Test double for [`ProtocolClient`].
pub struct ScriptedClient {
    device_jid: String,
    connected: AtomicBool,
    logged_in: AtomicBool,
    /// `connect()` flips `connected` and emits `Connected` when set (default).
    auto_connect: AtomicBool,
    fail_sends: AtomicBool,
    handler: RwLock<Option<Arc<dyn EventHandler>>>,
    script: Mutex<Script>,
    next_seq: AtomicU64,

    sends: Mutex<Vec<RecordedSend>>,
    reads: Mutex<Vec<RecordedRead>>,
    uploads: Mutex<Vec<(MediaKind, usize)>>,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

impl ScriptedClient {
    #[must_use]
    pub fn new(device_jid: &str) -> Arc<Self> {
        Arc::new(Self {
            device_jid: device_jid.to_string(),
            connected: AtomicBool::new(false),
            logged_in: AtomicBool::new(true),
            auto_connect: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
            handler: RwLock::new(None),
            script: Mutex::new(Script::default()),
            next_seq: AtomicU64::new(1),
            sends: Mutex::new(Vec::new()),
            reads: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
        })
    }

    /// Deliver an event through the registered handler, awaiting it like the
    /// real event loop does.
    pub async fn emit(&self, event: ProtocolEvent) {
        let handler = self.handler.read().unwrap().clone();
        if let Some(handler) = handler {
            handler.handle(event).await;
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    /// Disable the connect-side effects so tests can drive state transitions
    /// purely through `emit`.
    pub fn manual_connect(&self) {
        self.auto_connect.store(false, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn script_qr(&self, updates: Vec<PairingUpdate>) {
        self.script.lock().unwrap().qr_updates = updates;
    }

    pub fn script_pair_code(&self, code: &str) {
        self.script.lock().unwrap().pair_code = Some(code.to_string());
    }

    pub fn script_groups(&self, groups: Vec<GroupSnapshot>) {
        self.script.lock().unwrap().groups = groups;
    }

    pub fn script_contacts(&self, contacts: Vec<ContactEntry>) {
        self.script.lock().unwrap().contacts = contacts;
    }

    pub fn script_newsletters(&self, newsletters: Vec<NewsletterSnapshot>) {
        self.script.lock().unwrap().newsletters = newsletters;
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().unwrap().clone()
    }

    pub fn reads(&self) -> Vec<RecordedRead> {
        self.reads.lock().unwrap().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    fn next_message_id(&self) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        format!("3EB0{seq:012X}")
    }

    fn ensure_connected(&self) -> ClientResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }
}

#[async_trait]
impl ProtocolClient for ScriptedClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn self_jid(&self) -> Option<Jid> {
        Jid::parse(&format!("{}@{}", self.device_jid, crate::USER_SERVER)).ok()
    }

    async fn connect(&self) -> ClientResult<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.auto_connect.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            self.emit(ProtocolEvent::Connected).await;
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn logout(&self) -> ClientResult<()> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.logged_in.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        *self.handler.write().unwrap() = Some(handler);
    }

    async fn start_qr_pairing(&self) -> ClientResult<mpsc::Receiver<PairingUpdate>> {
        let updates = std::mem::take(&mut self.script.lock().unwrap().qr_updates);
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(async move {
            for update in updates {
                if tx.send(update).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }

    async fn pair_phone(&self, _phone_number: &str) -> ClientResult<String> {
        self.script
            .lock()
            .unwrap()
            .pair_code
            .clone()
            .ok_or_else(|| Error::Rejected("pairing unavailable".into()))
    }

    async fn send(&self, to: &Jid, content: OutgoingContent) -> ClientResult<SendReceipt> {
        self.ensure_connected()?;
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Rejected("scripted send failure".into()));
        }
        self.sends.lock().unwrap().push(RecordedSend {
            to: to.clone(),
            content,
        });
        Ok(SendReceipt {
            message_id: self.next_message_id(),
            timestamp: now_unix(),
        })
    }

    async fn upload(&self, data: Vec<u8>, kind: MediaKind) -> ClientResult<UploadedMedia> {
        self.ensure_connected()?;
        let size = data.len();
        self.uploads.lock().unwrap().push((kind, size));
        Ok(UploadedMedia {
            reference: format!("mms/{}", self.next_message_id()),
            kind,
            size: size as u64,
        })
    }

    async fn mark_read(
        &self,
        chat: &Jid,
        _sender: &Jid,
        message_ids: &[String],
        _timestamp: i64,
    ) -> ClientResult<()> {
        self.ensure_connected()?;
        self.reads.lock().unwrap().push(RecordedRead {
            chat: chat.clone(),
            message_ids: message_ids.to_vec(),
        });
        Ok(())
    }

    async fn send_presence(&self, _state: PresenceState) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn send_chat_presence(
        &self,
        _chat: &Jid,
        _state: ChatPresenceState,
    ) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn joined_groups(&self) -> ClientResult<Vec<GroupSnapshot>> {
        self.ensure_connected()?;
        Ok(self.script.lock().unwrap().groups.clone())
    }

    async fn create_group(
        &self,
        subject: &str,
        participants: &[Jid],
    ) -> ClientResult<GroupSnapshot> {
        self.ensure_connected()?;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let group = GroupSnapshot {
            jid: Jid::parse(&format!("12036302045{seq:07}@{}", crate::GROUP_SERVER)).unwrap(),
            name: subject.to_string(),
            topic: None,
            owner: self.self_jid(),
            participants: participants
                .iter()
                .map(|jid| crate::GroupParticipant {
                    jid: jid.clone(),
                    admin: false,
                    super_admin: false,
                })
                .collect(),
            created_at: Some(now_unix()),
        };
        self.script.lock().unwrap().groups.push(group.clone());
        Ok(group)
    }

    async fn join_group_with_link(&self, _invite_code: &str) -> ClientResult<Jid> {
        self.ensure_connected()?;
        self.script
            .lock()
            .unwrap()
            .groups
            .first()
            .map(|g| g.jid.clone())
            .ok_or_else(|| Error::Rejected("invite expired".into()))
    }

    async fn group_invite_preview(&self, _invite_code: &str) -> ClientResult<GroupSnapshot> {
        self.ensure_connected()?;
        self.script
            .lock()
            .unwrap()
            .groups
            .first()
            .cloned()
            .ok_or_else(|| Error::Rejected("invite expired".into()))
    }

    async fn group_info(&self, group: &Jid) -> ClientResult<GroupSnapshot> {
        self.ensure_connected()?;
        self.script
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| &g.jid == group)
            .cloned()
            .ok_or_else(|| Error::Rejected("unknown group".into()))
    }

    async fn update_participants(
        &self,
        _group: &Jid,
        users: &[Jid],
        _change: ParticipantChange,
    ) -> ClientResult<Vec<Jid>> {
        self.ensure_connected()?;
        Ok(users.to_vec())
    }

    async fn set_group_name(&self, _group: &Jid, _name: &str) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn set_group_topic(&self, _group: &Jid, _topic: &str) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn set_group_locked(&self, _group: &Jid, _locked: bool) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn set_group_announce(&self, _group: &Jid, _announce: bool) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn set_group_photo(&self, _group: &Jid, _jpeg: Vec<u8>) -> ClientResult<String> {
        self.ensure_connected()?;
        Ok(self.next_message_id())
    }

    async fn group_invite_link(&self, group: &Jid, reset: bool) -> ClientResult<String> {
        self.ensure_connected()?;
        let salt = if reset { "fresh" } else { "stable" };
        Ok(format!("https://chat.whatsapp.com/{salt}-{}", group.user()))
    }

    async fn leave_group(&self, _group: &Jid) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn avatar(&self, jid: &Jid, preview: bool) -> ClientResult<Option<AvatarInfo>> {
        self.ensure_connected()?;
        Ok(Some(AvatarInfo {
            url: format!(
                "https://pps.whatsapp.net/{}/{}",
                jid.user(),
                if preview { "preview" } else { "full" }
            ),
            id: "avatar-1".into(),
        }))
    }

    async fn set_avatar(&self, _jpeg: Vec<u8>) -> ClientResult<String> {
        self.ensure_connected()?;
        Ok("avatar-2".into())
    }

    async fn set_push_name(&self, _name: &str) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn set_status_message(&self, _status: &str) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn user_info(&self, jids: &[Jid]) -> ClientResult<Vec<UserInfo>> {
        self.ensure_connected()?;
        Ok(jids
            .iter()
            .map(|jid| UserInfo {
                jid: jid.clone(),
                verified_name: None,
                status: Some("Hey there!".into()),
                device_count: 1,
            })
            .collect())
    }

    async fn business_profile(&self, jid: &Jid) -> ClientResult<Option<BusinessProfile>> {
        self.ensure_connected()?;
        Ok(Some(BusinessProfile {
            jid: jid.clone(),
            name: None,
            category: None,
            email: None,
        }))
    }

    async fn privacy_settings(&self) -> ClientResult<PrivacySettings> {
        self.ensure_connected()?;
        Ok(PrivacySettings {
            group_add: "all".into(),
            last_seen: "contacts".into(),
            status: "contacts".into(),
            profile: "all".into(),
            read_receipts: "all".into(),
        })
    }

    async fn check_users(&self, phones: &[String]) -> ClientResult<Vec<UserCheck>> {
        self.ensure_connected()?;
        Ok(phones
            .iter()
            .map(|phone| UserCheck {
                query: phone.clone(),
                registered: true,
                jid: Jid::parse(&format!("{phone}@{}", crate::USER_SERVER)).ok(),
            })
            .collect())
    }

    async fn contacts(&self) -> ClientResult<Vec<ContactEntry>> {
        self.ensure_connected()?;
        Ok(self.script.lock().unwrap().contacts.clone())
    }

    async fn pin_chat(&self, _chat: &Jid, _pinned: bool) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn archive_chat(&self, _chat: &Jid, _archived: bool) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn mute_chat(&self, _chat: &Jid, _mute: Option<MuteDuration>) -> ClientResult<()> {
        self.ensure_connected()
    }

    async fn subscribed_newsletters(&self) -> ClientResult<Vec<NewsletterSnapshot>> {
        self.ensure_connected()?;
        Ok(self.script.lock().unwrap().newsletters.clone())
    }
}

/// Factory handing out one [`ScriptedClient`] per device, created on demand.
#[derive(Default)]
pub struct ScriptedFactory {
    clients: Mutex<std::collections::HashMap<String, Arc<ScriptedClient>>>,
    fail_next: AtomicBool,
}

impl ScriptedFactory {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `open` call fail, simulating an unreachable upstream.
    pub fn fail_next_open(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// The client bound to `device_jid`, creating it if needed.
    pub fn client(&self, device_jid: &str) -> Arc<ScriptedClient> {
        self.clients
            .lock()
            .unwrap()
            .entry(device_jid.to_string())
            .or_insert_with(|| ScriptedClient::new(device_jid))
            .clone()
    }

    pub fn opened_devices(&self) -> Vec<String> {
        self.clients.lock().unwrap().keys().cloned().collect()
    }
}

#[async_trait]
impl ClientFactory for ScriptedFactory {
    async fn open(&self, device_jid: &str) -> ClientResult<Arc<dyn ProtocolClient>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Protocol("device store unreachable".into()));
        }
        Ok(self.client(device_jid))
    }
}
