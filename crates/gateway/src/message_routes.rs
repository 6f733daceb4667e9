//! Unified send endpoint and message mutations. All of these sit behind the
//! rate-limit admission layer.

use std::time::Duration;

use {
    axum::{
        body::Bytes,
        extract::{Path, State},
        response::Json,
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tokio::time::timeout,
    tracing::info,
};

use wagate_client::{
    ChatPresenceState, MediaKind, OutgoingContent, PresenceState, UploadedMedia,
};

use crate::{
    error::{ApiError, ApiResult},
    extract::{map_client, parse_body, parse_jid, require_connected},
    media,
    request_id::Rid,
    state::AppState,
};

/// Deadline for one upstream send (including media upload).
const SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// How long a duplicate request waits for the original to finish its send.
const DUPLICATE_SETTLE: Duration = Duration::from_secs(2);

#[derive(Deserialize)]
struct AudioInfo {
    url: String,
    #[serde(default)]
    ptt: bool,
}

#[derive(Deserialize)]
struct LocationInfo {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct ContactInfo {
    name: String,
    vcard: String,
}

#[derive(Deserialize)]
struct PollInfo {
    question: String,
    options: Vec<String>,
}

#[derive(Deserialize)]
struct LinkInfo {
    url: String,
    #[serde(default)]
    caption: Option<String>,
}

#[derive(Deserialize)]
struct PresenceInfo {
    state: PresenceState,
}

#[derive(Deserialize)]
struct ChatPresenceInfo {
    jid: String,
    state: ChatPresenceState,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    wa_account_id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    media_url: String,
    #[serde(default)]
    file_name: String,
    #[serde(default)]
    mime: String,
    audio: Option<AudioInfo>,
    location: Option<LocationInfo>,
    contact: Option<ContactInfo>,
    poll: Option<PollInfo>,
    link: Option<LinkInfo>,
    presence: Option<PresenceInfo>,
    chat_presence: Option<ChatPresenceInfo>,
    #[serde(default)]
    idempotency_key: String,
}

/// POST /v1/messages
pub async fn send_message(
    State(state): State<AppState>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: SendMessageRequest = parse_body(&bytes, &rid)?;
    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    // Presence updates are fire-and-forget; no message id, no idempotency.
    if req.kind == "presence" {
        let presence = req
            .presence
            .ok_or_else(|| ApiError::invalid_request("presence is required").rid(&rid))?;
        session
            .client
            .send_presence(presence.state)
            .await
            .map_err(|err| map_client(err, "presence_failed", "failed to send presence", &rid))?;
        return Ok(Json(json!({
            "success": true,
            "type": "presence",
            "request_id": rid.0,
        })));
    }
    if req.kind == "chat_presence" {
        let chat_presence = req
            .chat_presence
            .ok_or_else(|| ApiError::invalid_request("chat_presence is required").rid(&rid))?;
        let chat = parse_jid(&chat_presence.jid, "chat", &rid)?;
        session
            .client
            .send_chat_presence(&chat, chat_presence.state)
            .await
            .map_err(|err| {
                map_client(err, "chat_presence_failed", "failed to send chat presence", &rid)
            })?;
        return Ok(Json(json!({
            "success": true,
            "type": "chat_presence",
            "request_id": rid.0,
        })));
    }

    if req.to.is_empty() {
        return Err(ApiError::invalid_request("to is required").rid(&rid));
    }
    let to = parse_jid(&req.to, "recipient", &rid)?;

    // Duplicate suppression: the first request stores a placeholder; replays
    // get the stored id back. A replay racing the original waits briefly for
    // the real id so both responses agree.
    let key = req.idempotency_key.clone();
    let (existing, duplicate) = state.idempotency.check_and_store(&key, "");
    if duplicate {
        let message_id = if existing.is_empty() {
            settled_message_id(&state, &key).await
        } else {
            existing
        };
        wagate_metrics::counter!(wagate_metrics::send::DUPLICATE_TOTAL).increment(1);
        info!(
            request_id = rid.0,
            account_id = req.wa_account_id,
            idempotency_key = key,
            "duplicate send collapsed"
        );
        return Ok(Json(json!({
            "success": true,
            "message_id": message_id,
            "duplicate": true,
            "request_id": rid.0,
        })));
    }

    let content = match build_content(&state, &session.client, &req, &rid).await {
        Ok(content) => content,
        Err(err) => {
            // Nothing was sent; let a corrected retry through.
            state.idempotency.forget(&key);
            return Err(err);
        },
    };

    let receipt = match timeout(SEND_TIMEOUT, session.client.send(&to, content)).await {
        Ok(Ok(receipt)) => receipt,
        Ok(Err(err)) => {
            wagate_metrics::counter!(wagate_metrics::send::FAILED_TOTAL).increment(1);
            state.idempotency.forget(&key);
            return Err(map_client(err, "send_failed", "failed to send message", &rid));
        },
        Err(_) => {
            // The send may still land upstream; keep the record so replays
            // stay collapsed rather than risking a double send.
            return Err(ApiError::timeout("upstream send timed out").rid(&rid));
        },
    };

    state.idempotency.record(&key, &receipt.message_id);
    wagate_metrics::counter!(wagate_metrics::send::MESSAGES_TOTAL, "type" => req.kind.clone())
        .increment(1);
    info!(
        request_id = rid.0,
        account_id = req.wa_account_id,
        message_id = receipt.message_id,
        kind = req.kind,
        "message sent"
    );

    Ok(Json(json!({
        "success": true,
        "message_id": receipt.message_id,
        "timestamp": receipt.timestamp,
        "request_id": rid.0,
    })))
}

/// Wait for a racing original send to record its message id.
async fn settled_message_id(state: &AppState, key: &str) -> String {
    let deadline = tokio::time::Instant::now() + DUPLICATE_SETTLE;
    loop {
        match state.idempotency.lookup(key) {
            Some(id) if !id.is_empty() => return id,
            _ if tokio::time::Instant::now() >= deadline => {
                return state.idempotency.lookup(key).unwrap_or_default();
            },
            _ => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
}

async fn upload_from_url(
    state: &AppState,
    client: &std::sync::Arc<dyn wagate_client::ProtocolClient>,
    url: &str,
    kind: MediaKind,
    rid: &Rid,
) -> Result<UploadedMedia, ApiError> {
    let data = media::fetch(&state.http, url, rid).await?;
    timeout(SEND_TIMEOUT, client.upload(data, kind))
        .await
        .map_err(|_| ApiError::timeout("media upload timed out").rid(rid))?
        .map_err(|err| map_client(err, "media_upload_failed", "failed to upload media", rid))
}

async fn build_content(
    state: &AppState,
    client: &std::sync::Arc<dyn wagate_client::ProtocolClient>,
    req: &SendMessageRequest,
    rid: &Rid,
) -> Result<OutgoingContent, ApiError> {
    let caption = (!req.body.is_empty()).then(|| req.body.clone());
    let mime = (!req.mime.is_empty()).then(|| req.mime.clone());

    match req.kind.as_str() {
        "text" => Ok(OutgoingContent::Text {
            body: req.body.clone(),
        }),
        "image" | "video" | "document" | "sticker" => {
            if req.media_url.is_empty() {
                return Err(ApiError::invalid_request(format!(
                    "media_url is required for {} messages",
                    req.kind
                ))
                .rid(rid));
            }
            let kind = match req.kind.as_str() {
                "image" => MediaKind::Image,
                "video" => MediaKind::Video,
                "document" => MediaKind::Document,
                _ => MediaKind::Sticker,
            };
            let media = upload_from_url(state, client, &req.media_url, kind, rid).await?;
            Ok(OutgoingContent::Media {
                media,
                caption,
                file_name: (!req.file_name.is_empty()).then(|| req.file_name.clone()),
                mime,
                ptt: false,
            })
        },
        "audio" => {
            let audio = req
                .audio
                .as_ref()
                .filter(|a| !a.url.is_empty())
                .ok_or_else(|| ApiError::invalid_request("audio data is required").rid(rid))?;
            let media = upload_from_url(state, client, &audio.url, MediaKind::Audio, rid).await?;
            Ok(OutgoingContent::Media {
                media,
                caption: None,
                file_name: None,
                mime: Some("audio/ogg; codecs=opus".into()),
                ptt: audio.ptt,
            })
        },
        "location" => {
            let location = req
                .location
                .as_ref()
                .ok_or_else(|| ApiError::invalid_request("location is required").rid(rid))?;
            Ok(OutgoingContent::Location {
                latitude: location.latitude,
                longitude: location.longitude,
                name: location.name.clone(),
            })
        },
        "contact" => {
            let contact = req
                .contact
                .as_ref()
                .filter(|c| !c.vcard.is_empty())
                .ok_or_else(|| ApiError::invalid_request("contact vcard is required").rid(rid))?;
            Ok(OutgoingContent::Contact {
                name: contact.name.clone(),
                vcard: contact.vcard.clone(),
            })
        },
        "poll" => {
            let poll = req
                .poll
                .as_ref()
                .filter(|p| !p.question.is_empty() && p.options.len() >= 2)
                .ok_or_else(|| {
                    ApiError::invalid_request("poll needs a question and at least two options")
                        .rid(rid)
                })?;
            Ok(OutgoingContent::Poll {
                question: poll.question.clone(),
                options: poll.options.clone(),
            })
        },
        "link" => {
            let link = req
                .link
                .as_ref()
                .filter(|l| !l.url.is_empty())
                .ok_or_else(|| ApiError::invalid_request("link url is required").rid(rid))?;
            Ok(OutgoingContent::Link {
                url: link.url.clone(),
                caption: link.caption.clone().or(caption),
            })
        },
        other => {
            Err(ApiError::invalid_request(format!("unsupported message type: {other}")).rid(rid))
        },
    }
}

// ── Mutations ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct MessageMutationRequest {
    wa_account_id: String,
    chat_jid: String,
    #[serde(default)]
    reaction: String,
    #[serde(default)]
    new_text: String,
}

async fn mutate(
    state: &AppState,
    rid: &Rid,
    bytes: &Bytes,
    build: impl FnOnce(&MessageMutationRequest, String) -> Result<OutgoingContent, ApiError>,
    label: &'static str,
    human: &'static str,
    message_id: String,
    done: &'static str,
) -> ApiResult<Json<Value>> {
    let req: MessageMutationRequest = parse_body(bytes, rid)?;
    if req.chat_jid.is_empty() {
        return Err(ApiError::invalid_request("chat_jid is required").rid(rid));
    }
    let chat = parse_jid(&req.chat_jid, "chat", rid)?;
    let session = state.session(&req.wa_account_id, rid).await?;
    require_connected(&session, rid)?;
    session.touch();

    let content = build(&req, message_id)?;
    timeout(SEND_TIMEOUT, session.client.send(&chat, content))
        .await
        .map_err(|_| ApiError::timeout("upstream send timed out").rid(rid))?
        .map_err(|err| map_client(err, label, human, rid))?;

    Ok(Json(json!({
        "success": true,
        "message": done,
        "request_id": rid.0,
    })))
}

/// POST /v1/messages/{message_id}/delete
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    mutate(
        &state,
        &rid,
        &bytes,
        |_req, message_id| Ok(OutgoingContent::Revoke { message_id }),
        "delete_failed",
        "failed to delete message",
        message_id,
        "message deleted",
    )
    .await
}

/// POST /v1/messages/{message_id}/revoke
pub async fn revoke_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    mutate(
        &state,
        &rid,
        &bytes,
        |_req, message_id| Ok(OutgoingContent::Revoke { message_id }),
        "revoke_failed",
        "failed to revoke message",
        message_id,
        "message revoked",
    )
    .await
}

/// POST /v1/messages/{message_id}/react
pub async fn react_to_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    mutate(
        &state,
        &rid,
        &bytes,
        |req, message_id| {
            Ok(OutgoingContent::Reaction {
                message_id,
                emoji: req.reaction.clone(),
            })
        },
        "reaction_failed",
        "failed to send reaction",
        message_id,
        "reaction sent",
    )
    .await
}

/// POST /v1/messages/{message_id}/update
pub async fn update_message(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let rid_for_err = rid.clone();
    mutate(
        &state,
        &rid,
        &bytes,
        move |req, message_id| {
            if req.new_text.is_empty() {
                return Err(
                    ApiError::invalid_request("new_text is required").rid(&rid_for_err)
                );
            }
            Ok(OutgoingContent::Edit {
                message_id,
                new_text: req.new_text.clone(),
            })
        },
        "update_failed",
        "failed to update message",
        message_id,
        "message updated",
    )
    .await
}
