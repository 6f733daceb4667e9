//! Protocol value types shared between the client boundary and its consumers.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Server part of group JIDs.
pub const GROUP_SERVER: &str = "g.us";
/// Server part of regular user JIDs.
pub const USER_SERVER: &str = "s.whatsapp.net";

// ── Addressing ──────────────────────────────────────────────────────────────

/// A network address (`user@server`), the upstream's universal identifier for
/// users, groups and newsletters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Jid(String);

impl Jid {
    /// Parse and validate a JID string. Both parts must be non-empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let (user, server) = raw
            .split_once('@')
            .ok_or_else(|| Error::Protocol(format!("invalid JID: {raw}")))?;
        if user.is_empty() || server.is_empty() {
            return Err(Error::Protocol(format!("invalid JID: {raw}")));
        }
        Ok(Self(raw.to_string()))
    }

    #[must_use]
    pub fn user(&self) -> &str {
        self.0.split_once('@').map(|(u, _)| u).unwrap_or(&self.0)
    }

    #[must_use]
    pub fn server(&self) -> &str {
        self.0.split_once('@').map(|(_, s)| s).unwrap_or("")
    }

    #[must_use]
    pub fn is_group(&self) -> bool {
        self.server() == GROUP_SERVER
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Outbound messages ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
    Sticker,
}

/// Handle to a blob already uploaded to the network's media servers.
#[derive(Debug, Clone)]
pub struct UploadedMedia {
    pub reference: String,
    pub kind: MediaKind,
    pub size: u64,
}

/// Everything the gateway can ask a session to send.
#[derive(Debug, Clone)]
pub enum OutgoingContent {
    Text {
        body: String,
    },
    Media {
        media: UploadedMedia,
        caption: Option<String>,
        file_name: Option<String>,
        mime: Option<String>,
        /// Voice-note flag, audio only.
        ptt: bool,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
    },
    Contact {
        name: String,
        vcard: String,
    },
    Poll {
        question: String,
        options: Vec<String>,
    },
    Link {
        url: String,
        caption: Option<String>,
    },
    /// Retract a previously sent message (delete-for-everyone).
    Revoke {
        message_id: String,
    },
    /// Edit a previously sent text message.
    Edit {
        message_id: String,
        new_text: String,
    },
    Reaction {
        message_id: String,
        emoji: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatPresenceState {
    Typing,
    Recording,
    Paused,
}

/// Mute span for a chat. `Permanent` maps to the protocol's native flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuteDuration {
    Permanent,
    For(Duration),
}

/// Upstream acknowledgement of a send.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    /// Server timestamp, unix seconds.
    pub timestamp: i64,
}

// ── Pairing ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum PairingUpdate {
    /// A fresh QR code to present; valid for `timeout`.
    Code { code: String, timeout: Duration },
    Success,
    Timeout,
    Error(String),
}

// ── Inbound events ──────────────────────────────────────────────────────────

/// One message received on a session.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: String,
    pub from: Jid,
    pub chat: Jid,
    /// Unix seconds.
    pub timestamp: i64,
    pub from_me: bool,
    pub content: IncomingContent,
}

impl IncomingMessage {
    #[must_use]
    pub fn is_group(&self) -> bool {
        self.chat.is_group()
    }
}

#[derive(Debug, Clone)]
pub enum IncomingContent {
    Text {
        body: String,
    },
    Image {
        caption: Option<String>,
        mime: Option<String>,
    },
    Video {
        caption: Option<String>,
        mime: Option<String>,
    },
    Audio {
        ptt: bool,
    },
    Document {
        file_name: Option<String>,
        mime: Option<String>,
    },
    Sticker,
    Location {
        latitude: f64,
        longitude: f64,
    },
    Contact {
        name: Option<String>,
        vcard: String,
    },
    Poll {
        question: String,
    },
    Reaction {
        target_id: String,
        emoji: String,
    },
    Unknown,
}

impl IncomingContent {
    /// Wire label for the webhook payload's `type` field.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
            Self::Video { .. } => "video",
            Self::Audio { .. } => "audio",
            Self::Document { .. } => "document",
            Self::Sticker => "sticker",
            Self::Location { .. } => "location",
            Self::Contact { .. } => "contact",
            Self::Poll { .. } => "poll",
            Self::Reaction { .. } => "reaction",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptKind {
    Delivered,
    Read,
}

/// The upstream event stream, one tagged union per session.
///
/// New variants appear as the underlying library grows; consumers must treat
/// unrecognized variants as skippable rather than fatal.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ProtocolEvent {
    Message(IncomingMessage),
    Receipt {
        chat: Jid,
        sender: Option<Jid>,
        kind: ReceiptKind,
        message_ids: Vec<String>,
        /// Unix seconds.
        timestamp: i64,
    },
    Connected,
    Disconnected,
    LoggedOut {
        reason: String,
    },
    /// Another client took over this device's stream.
    StreamReplaced,
    Qr {
        codes: Vec<String>,
    },
    PairSuccess {
        jid: Jid,
        business_name: String,
        platform: String,
    },
    GroupInfo {
        group: Jid,
        name: Option<String>,
        topic: Option<String>,
    },
    JoinedGroup {
        group: Jid,
        /// Unix seconds.
        created_at: Option<i64>,
    },
    HistorySync {
        kind: String,
        conversation_count: usize,
    },
}

// ── Directory & profile snapshots ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct GroupParticipant {
    pub jid: Jid,
    pub admin: bool,
    pub super_admin: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupSnapshot {
    pub jid: Jid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<Jid>,
    pub participants: Vec<GroupParticipant>,
    /// Unix seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantChange {
    Add,
    Remove,
    Promote,
    Demote,
}

#[derive(Debug, Clone, Serialize)]
pub struct AvatarInfo {
    pub url: String,
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserInfo {
    pub jid: Jid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub device_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct BusinessProfile {
    pub jid: Jid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PrivacySettings {
    pub group_add: String,
    pub last_seen: String,
    pub status: String,
    pub profile: String,
    pub read_receipts: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserCheck {
    pub query: String,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jid: Option<Jid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContactEntry {
    pub jid: Jid,
    pub full_name: String,
    pub push_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewsletterSnapshot {
    pub jid: Jid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jid_parse_accepts_user_and_group() {
        let user = Jid::parse("31612345678@s.whatsapp.net").unwrap();
        assert_eq!(user.user(), "31612345678");
        assert_eq!(user.server(), USER_SERVER);
        assert!(!user.is_group());

        let group = Jid::parse("120363020451234567@g.us").unwrap();
        assert!(group.is_group());
    }

    #[test]
    fn jid_parse_rejects_malformed() {
        assert!(Jid::parse("").is_err());
        assert!(Jid::parse("no-at-sign").is_err());
        assert!(Jid::parse("@g.us").is_err());
        assert!(Jid::parse("user@").is_err());
    }

    #[test]
    fn jid_serializes_as_plain_string() {
        let jid = Jid::parse("a@b").unwrap();
        assert_eq!(serde_json::to_string(&jid).unwrap(), "\"a@b\"");
    }

    #[test]
    fn incoming_content_kind_labels() {
        assert_eq!(IncomingContent::Text { body: "x".into() }.kind(), "text");
        assert_eq!(IncomingContent::Sticker.kind(), "sticker");
        assert_eq!(IncomingContent::Unknown.kind(), "unknown");
    }
}
