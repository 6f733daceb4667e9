//! Group management, delegated to the upstream capability.

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
    tracing::warn,
};

use wagate_client::{GroupSnapshot, Jid, ParticipantChange};

use crate::{
    error::{ApiError, ApiResult},
    extract::{map_client, parse_body, parse_jid, require_connected, required_query},
    media,
    request_id::Rid,
    state::AppState,
};

const GROUP_OP_TIMEOUT: Duration = Duration::from_secs(30);
/// Group subjects and names are capped upstream.
const MAX_SUBJECT_LEN: usize = 25;
const INVITE_LINK_PREFIX: &str = "https://chat.whatsapp.com/";

fn group_summary(group: &GroupSnapshot) -> Value {
    json!({
        "jid": group.jid,
        "name": group.name,
        "owner": group.owner,
        "participant_count": group.participants.len(),
        "created_at": group.created_at,
    })
}

fn invite_code(link: &str) -> &str {
    link.strip_prefix(INVITE_LINK_PREFIX).unwrap_or(link)
}

/// GET /v1/groups?wa_account_id=...
pub async fn list_groups(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    let groups = timeout(GROUP_OP_TIMEOUT, session.client.joined_groups())
        .await
        .map_err(|_| ApiError::timeout("group list timed out").rid(&rid))?
        .map_err(|err| map_client(err, "groups_fetch_failed", "failed to get groups", &rid))?;

    let list: Vec<Value> = groups.iter().map(group_summary).collect();
    Ok(Json(json!({
        "groups": list,
        "count": list.len(),
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct CreateGroupRequest {
    wa_account_id: String,
    subject: String,
    participants: Vec<String>,
}

/// POST /v1/groups
pub async fn create_group(
    State(state): State<AppState>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: CreateGroupRequest = parse_body(&bytes, &rid)?;
    if req.subject.is_empty() || req.subject.len() > MAX_SUBJECT_LEN {
        return Err(
            ApiError::invalid_request("subject must be between 1 and 25 characters").rid(&rid),
        );
    }
    if req.participants.is_empty() {
        return Err(ApiError::invalid_request("participants must not be empty").rid(&rid));
    }
    let participants: Vec<Jid> = req
        .participants
        .iter()
        .map(|raw| parse_jid(raw, "participant", &rid))
        .collect::<Result<_, _>>()?;

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    let group = timeout(
        GROUP_OP_TIMEOUT,
        session.client.create_group(&req.subject, &participants),
    )
    .await
    .map_err(|_| ApiError::timeout("group creation timed out").rid(&rid))?
    .map_err(|err| map_client(err, "group_create_failed", "failed to create group", &rid))?;

    Ok(Json(json!({
        "success": true,
        "group": group_summary(&group),
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct JoinGroupRequest {
    wa_account_id: String,
    invite_link: String,
}

/// POST /v1/groups/join
pub async fn join_group(
    State(state): State<AppState>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: JoinGroupRequest = parse_body(&bytes, &rid)?;
    if req.invite_link.is_empty() {
        return Err(ApiError::invalid_request("invite_link is required").rid(&rid));
    }

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    let group = timeout(
        GROUP_OP_TIMEOUT,
        session.client.join_group_with_link(invite_code(&req.invite_link)),
    )
    .await
    .map_err(|_| ApiError::timeout("group join timed out").rid(&rid))?
    .map_err(|err| map_client(err, "group_join_failed", "failed to join group", &rid))?;

    Ok(Json(json!({
        "success": true,
        "group_jid": group,
        "request_id": rid.0,
    })))
}

/// GET /v1/groups/preview?wa_account_id=...&invite_link=...
pub async fn group_preview(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let invite_link = required_query(&params, "invite_link", &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let group = timeout(
        GROUP_OP_TIMEOUT,
        session.client.group_invite_preview(invite_code(invite_link)),
    )
    .await
    .map_err(|_| ApiError::timeout("group preview timed out").rid(&rid))?
    .map_err(|err| map_client(err, "group_fetch_failed", "failed to preview group", &rid))?;

    Ok(Json(json!({
        "group": group_summary(&group),
        "request_id": rid.0,
    })))
}

/// GET /v1/groups/{group_id}?wa_account_id=...
pub async fn group_info(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let group = parse_jid(&group_id, "group", &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let info = timeout(GROUP_OP_TIMEOUT, session.client.group_info(&group))
        .await
        .map_err(|_| ApiError::timeout("group info timed out").rid(&rid))?
        .map_err(|err| map_client(err, "group_fetch_failed", "failed to get group info", &rid))?;

    let participants: Vec<Value> = info
        .participants
        .iter()
        .map(|p| {
            json!({
                "jid": p.jid,
                "admin": p.admin,
                "super_admin": p.super_admin,
            })
        })
        .collect();

    Ok(Json(json!({
        "jid": info.jid,
        "name": info.name,
        "topic": info.topic,
        "owner": info.owner,
        "created_at": info.created_at,
        "participants": participants,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct ManageParticipantsRequest {
    wa_account_id: String,
    #[serde(default)]
    add: Vec<String>,
    #[serde(default)]
    remove: Vec<String>,
    #[serde(default)]
    promote: Vec<String>,
    #[serde(default)]
    demote: Vec<String>,
}

/// POST /v1/groups/{group_id}/participants
///
/// Each change set is applied independently; per-set failures land in the
/// response instead of failing the whole request.
pub async fn manage_participants(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: ManageParticipantsRequest = parse_body(&bytes, &rid)?;
    let group = parse_jid(&group_id, "group", &rid)?;

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    let mut results = serde_json::Map::new();
    let changes = [
        ("add", "added", "add_error", ParticipantChange::Add, &req.add),
        ("remove", "removed", "remove_error", ParticipantChange::Remove, &req.remove),
        ("promote", "promoted", "promote_error", ParticipantChange::Promote, &req.promote),
        ("demote", "demoted", "demote_error", ParticipantChange::Demote, &req.demote),
    ];

    for (verb, ok_key, err_key, change, raw_users) in changes {
        if raw_users.is_empty() {
            continue;
        }
        let users: Vec<Jid> = raw_users
            .iter()
            .filter_map(|raw| match Jid::parse(raw) {
                Ok(jid) => Some(jid),
                Err(_) => {
                    warn!(request_id = rid.0, participant = raw, verb, "skipping invalid participant JID");
                    None
                },
            })
            .collect();
        if users.is_empty() {
            continue;
        }

        match timeout(
            GROUP_OP_TIMEOUT,
            session.client.update_participants(&group, &users, change),
        )
        .await
        {
            Ok(Ok(updated)) => {
                results.insert(ok_key.into(), updated.len().into());
            },
            Ok(Err(err)) => {
                warn!(request_id = rid.0, verb, error = %err, "participant update failed");
                results.insert(err_key.into(), err.to_string().into());
            },
            Err(_) => {
                results.insert(err_key.into(), "operation timed out".into());
            },
        }
    }

    results.insert("success".into(), true.into());
    results.insert("request_id".into(), rid.0.clone().into());
    Ok(Json(Value::Object(results)))
}

#[derive(Deserialize)]
struct SetGroupPhotoRequest {
    wa_account_id: String,
    image_url: String,
}

/// POST /v1/groups/{group_id}/photo
pub async fn set_group_photo(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: SetGroupPhotoRequest = parse_body(&bytes, &rid)?;
    if req.image_url.is_empty() {
        return Err(ApiError::invalid_request("image_url is required").rid(&rid));
    }
    let group = parse_jid(&group_id, "group", &rid)?;

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    let jpeg = media::fetch(&state.http, &req.image_url, &rid).await?;
    let picture_id = timeout(GROUP_OP_TIMEOUT, session.client.set_group_photo(&group, jpeg))
        .await
        .map_err(|_| ApiError::timeout("photo update timed out").rid(&rid))?
        .map_err(|err| map_client(err, "group_update_failed", "failed to set group photo", &rid))?;

    Ok(Json(json!({
        "success": true,
        "picture_id": picture_id,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct GroupFieldRequest {
    wa_account_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    locked: bool,
    #[serde(default)]
    announce: bool,
}

enum GroupSetting {
    Name,
    Topic,
    Locked,
    Announce,
}

async fn group_setting(
    state: &AppState,
    group_id: &str,
    rid: &Rid,
    bytes: &Bytes,
    setting: GroupSetting,
) -> ApiResult<Json<Value>> {
    let req: GroupFieldRequest = parse_body(bytes, rid)?;
    let group = parse_jid(group_id, "group", rid)?;

    if matches!(setting, GroupSetting::Name)
        && (req.name.is_empty() || req.name.len() > MAX_SUBJECT_LEN)
    {
        return Err(
            ApiError::invalid_request("name must be between 1 and 25 characters").rid(rid),
        );
    }

    let session = state.session(&req.wa_account_id, rid).await?;
    require_connected(&session, rid)?;
    session.touch();

    let call = async {
        match setting {
            GroupSetting::Name => session.client.set_group_name(&group, &req.name).await,
            GroupSetting::Topic => {
                session
                    .client
                    .set_group_topic(&group, req.topic.as_deref().unwrap_or_default())
                    .await
            },
            GroupSetting::Locked => session.client.set_group_locked(&group, req.locked).await,
            GroupSetting::Announce => {
                session.client.set_group_announce(&group, req.announce).await
            },
        }
    };
    timeout(GROUP_OP_TIMEOUT, call)
        .await
        .map_err(|_| ApiError::timeout("group update timed out").rid(rid))?
        .map_err(|err| map_client(err, "group_update_failed", "failed to update group", rid))?;

    Ok(Json(json!({
        "success": true,
        "request_id": rid.0,
    })))
}

/// POST /v1/groups/{group_id}/name
pub async fn set_group_name(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    group_setting(&state, &group_id, &rid, &bytes, GroupSetting::Name).await
}

/// POST /v1/groups/{group_id}/topic
pub async fn set_group_topic(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    group_setting(&state, &group_id, &rid, &bytes, GroupSetting::Topic).await
}

/// POST /v1/groups/{group_id}/locked
pub async fn set_group_locked(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    group_setting(&state, &group_id, &rid, &bytes, GroupSetting::Locked).await
}

/// POST /v1/groups/{group_id}/announce
pub async fn set_group_announce(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    group_setting(&state, &group_id, &rid, &bytes, GroupSetting::Announce).await
}

/// GET /v1/groups/{group_id}/invite_link?wa_account_id=...&reset=true
pub async fn group_invite_link(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let reset = params.get("reset").is_some_and(|v| v == "true");
    let group = parse_jid(&group_id, "group", &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let link = timeout(
        GROUP_OP_TIMEOUT,
        session.client.group_invite_link(&group, reset),
    )
    .await
    .map_err(|_| ApiError::timeout("invite link fetch timed out").rid(&rid))?
    .map_err(|err| map_client(err, "group_fetch_failed", "failed to get invite link", &rid))?;

    Ok(Json(json!({
        "invite_link": link,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct LeaveGroupRequest {
    wa_account_id: String,
}

/// POST /v1/groups/{group_id}/leave
pub async fn leave_group(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: LeaveGroupRequest = parse_body(&bytes, &rid)?;
    let group = parse_jid(&group_id, "group", &rid)?;

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    timeout(GROUP_OP_TIMEOUT, session.client.leave_group(&group))
        .await
        .map_err(|_| ApiError::timeout("leave group timed out").rid(&rid))?
        .map_err(|err| map_client(err, "group_update_failed", "failed to leave group", &rid))?;

    Ok(Json(json!({
        "success": true,
        "request_id": rid.0,
    })))
}
