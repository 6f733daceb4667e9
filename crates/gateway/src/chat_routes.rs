//! Chat-level operations: listing, read receipts, pin/archive/mute.

use std::{collections::HashMap, time::Duration};

use {
    axum::{
        body::Bytes,
        extract::{Path, Query, State},
        response::Json,
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tokio::time::timeout,
};

use wagate_client::MuteDuration;

use crate::{
    error::{ApiError, ApiResult},
    extract::{map_client, parse_body, parse_jid, require_connected, required_query},
    request_id::Rid,
    state::AppState,
};

const CHAT_OP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PER_PAGE: usize = 20;
const MAX_PER_PAGE: usize = 100;

/// GET /v1/chats?wa_account_id=...&search=...&page=1&per_page=20
///
/// The contact book stands in for the chat list: the gateway keeps no
/// message history, so contacts are the best available proxy.
pub async fn list_chats(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let search = params.get("search").map(|s| s.to_lowercase());
    let page = params
        .get("page")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1);
    let per_page = params
        .get("per_page")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|p| (1..=MAX_PER_PAGE).contains(p))
        .unwrap_or(DEFAULT_PER_PAGE);

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let contacts = timeout(CHAT_OP_TIMEOUT, session.client.contacts())
        .await
        .map_err(|_| ApiError::timeout("chat list timed out").rid(&rid))?
        .map_err(|err| map_client(err, "contacts_fetch_failed", "failed to get chats", &rid))?;

    let filtered: Vec<Value> = contacts
        .iter()
        .filter(|c| {
            search.as_ref().is_none_or(|needle| {
                c.full_name.to_lowercase().contains(needle)
                    || c.push_name.to_lowercase().contains(needle)
                    || c.jid.as_str().to_lowercase().contains(needle)
            })
        })
        .map(|c| {
            json!({
                "jid": c.jid,
                "name": c.full_name,
                "push_name": c.push_name,
                "is_group": c.jid.is_group(),
            })
        })
        .collect();

    let total = filtered.len();
    let total_pages = total.div_ceil(per_page);
    let start = (page - 1).saturating_mul(per_page).min(total);
    let end = (start + per_page).min(total);
    let page_items = filtered[start..end].to_vec();

    Ok(Json(json!({
        "chats": page_items,
        "meta": {
            "current_page": page,
            "per_page": per_page,
            "total": total,
            "total_pages": total_pages,
        },
        "request_id": rid.0,
    })))
}

/// GET /v1/chats/{chat_id}/messages
///
/// Message history is not persisted by the gateway; the response says so
/// instead of pretending to be empty history.
pub async fn chat_messages(
    State(_state): State<AppState>,
    Path(_chat_id): Path<String>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    Ok(Json(json!({
        "messages": [],
        "note": "message history is not stored by this gateway; consume inbound webhooks instead",
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct PinChatRequest {
    wa_account_id: String,
    #[serde(default)]
    pinned: bool,
}

/// POST /v1/chats/{chat_id}/pin
pub async fn pin_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: PinChatRequest = parse_body(&bytes, &rid)?;
    let chat = parse_jid(&chat_id, "chat", &rid)?;

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    timeout(CHAT_OP_TIMEOUT, session.client.pin_chat(&chat, req.pinned))
        .await
        .map_err(|_| ApiError::timeout("pin timed out").rid(&rid))?
        .map_err(|err| map_client(err, "pin_failed", "failed to pin chat", &rid))?;

    Ok(Json(json!({
        "success": true,
        "pinned": req.pinned,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct MarkAsReadRequest {
    wa_account_id: String,
    message_ids: Vec<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// POST /v1/chats/{chat_id}/read
pub async fn mark_as_read(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: MarkAsReadRequest = parse_body(&bytes, &rid)?;
    if req.message_ids.is_empty() {
        return Err(ApiError::invalid_request("message_ids is required").rid(&rid));
    }
    let chat = parse_jid(&chat_id, "chat", &rid)?;
    let sender = match &req.sender {
        Some(raw) => parse_jid(raw, "sender", &rid)?,
        None => chat.clone(),
    };
    let timestamp = req.timestamp.unwrap_or_else(|| {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    });

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    timeout(
        CHAT_OP_TIMEOUT,
        session
            .client
            .mark_read(&chat, &sender, &req.message_ids, timestamp),
    )
    .await
    .map_err(|_| ApiError::timeout("mark read timed out").rid(&rid))?
    .map_err(|err| map_client(err, "read_failed", "failed to mark as read", &rid))?;

    Ok(Json(json!({
        "success": true,
        "marked": req.message_ids.len(),
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct ArchiveChatRequest {
    wa_account_id: String,
    #[serde(default)]
    archived: bool,
}

/// POST /v1/chats/{chat_id}/archive
pub async fn archive_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: ArchiveChatRequest = parse_body(&bytes, &rid)?;
    let chat = parse_jid(&chat_id, "chat", &rid)?;

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    timeout(
        CHAT_OP_TIMEOUT,
        session.client.archive_chat(&chat, req.archived),
    )
    .await
    .map_err(|_| ApiError::timeout("archive timed out").rid(&rid))?
    .map_err(|err| map_client(err, "archive_failed", "failed to archive chat", &rid))?;

    Ok(Json(json!({
        "success": true,
        "archived": req.archived,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct MuteChatRequest {
    wa_account_id: String,
    #[serde(default)]
    muted: bool,
    /// Seconds; 0 means permanent.
    #[serde(default)]
    duration: u64,
}

/// POST /v1/chats/{chat_id}/mute
pub async fn mute_chat(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: MuteChatRequest = parse_body(&bytes, &rid)?;
    let chat = parse_jid(&chat_id, "chat", &rid)?;

    let mute = if req.muted {
        if req.duration > 0 {
            Some(MuteDuration::For(Duration::from_secs(req.duration)))
        } else {
            Some(MuteDuration::Permanent)
        }
    } else {
        None
    };

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    timeout(CHAT_OP_TIMEOUT, session.client.mute_chat(&chat, mute))
        .await
        .map_err(|_| ApiError::timeout("mute timed out").rid(&rid))?
        .map_err(|err| map_client(err, "mute_failed", "failed to mute chat", &rid))?;

    Ok(Json(json!({
        "success": true,
        "muted": req.muted,
        "request_id": rid.0,
    })))
}
