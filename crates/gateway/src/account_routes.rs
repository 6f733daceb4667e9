//! Account profile endpoints.

use std::{collections::HashMap, time::Duration};

use {
    axum::{
        body::Bytes,
        extract::{Query, State},
        response::Json,
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tokio::time::timeout,
};

use wagate_client::{Jid, USER_SERVER};

use crate::{
    error::{ApiError, ApiResult},
    extract::{map_client, parse_body, parse_jid, require_connected, required_query},
    media,
    request_id::Rid,
    state::AppState,
};

const ACCOUNT_OP_TIMEOUT: Duration = Duration::from_secs(15);
const MAX_PUSH_NAME_LEN: usize = 25;

/// Accept either a full JID or a bare phone number.
fn jid_from_phone_or_jid(raw: &str, rid: &Rid) -> Result<Jid, ApiError> {
    if raw.contains('@') {
        parse_jid(raw, "user", rid)
    } else {
        parse_jid(&format!("{raw}@{USER_SERVER}"), "user", rid)
    }
}

/// GET /v1/account/avatar?wa_account_id=...&phone=...&preview=true
pub async fn get_avatar(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let phone = required_query(&params, "phone", &rid)?;
    let preview = params.get("preview").is_some_and(|v| v == "true");
    let jid = jid_from_phone_or_jid(phone, &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let avatar = timeout(ACCOUNT_OP_TIMEOUT, session.client.avatar(&jid, preview))
        .await
        .map_err(|_| ApiError::timeout("avatar fetch timed out").rid(&rid))?
        .map_err(|err| map_client(err, "avatar_fetch_failed", "failed to get avatar", &rid))?;

    Ok(Json(json!({
        "avatar": avatar,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct ChangeAvatarRequest {
    wa_account_id: String,
    image_url: String,
}

/// POST /v1/account/avatar
pub async fn change_avatar(
    State(state): State<AppState>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: ChangeAvatarRequest = parse_body(&bytes, &rid)?;
    if req.image_url.is_empty() {
        return Err(ApiError::invalid_request("image_url is required").rid(&rid));
    }

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    let jpeg = media::fetch(&state.http, &req.image_url, &rid).await?;
    let picture_id = timeout(ACCOUNT_OP_TIMEOUT, session.client.set_avatar(jpeg))
        .await
        .map_err(|_| ApiError::timeout("avatar update timed out").rid(&rid))?
        .map_err(|err| map_client(err, "avatar_update_failed", "failed to set avatar", &rid))?;

    Ok(Json(json!({
        "success": true,
        "picture_id": picture_id,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct ChangePushNameRequest {
    wa_account_id: String,
    push_name: String,
}

/// POST /v1/account/push_name
pub async fn change_push_name(
    State(state): State<AppState>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: ChangePushNameRequest = parse_body(&bytes, &rid)?;
    if req.push_name.is_empty() || req.push_name.len() > MAX_PUSH_NAME_LEN {
        return Err(
            ApiError::invalid_request("push_name must be between 1 and 25 characters").rid(&rid),
        );
    }

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    timeout(ACCOUNT_OP_TIMEOUT, session.client.set_push_name(&req.push_name))
        .await
        .map_err(|_| ApiError::timeout("push name update timed out").rid(&rid))?
        .map_err(|err| {
            map_client(err, "push_name_update_failed", "failed to set push name", &rid)
        })?;

    Ok(Json(json!({
        "success": true,
        "push_name": req.push_name,
        "request_id": rid.0,
    })))
}

#[derive(Deserialize)]
struct SetStatusRequest {
    wa_account_id: String,
    status: String,
}

/// POST /v1/account/status
pub async fn set_status(
    State(state): State<AppState>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: SetStatusRequest = parse_body(&bytes, &rid)?;

    let session = state.session(&req.wa_account_id, &rid).await?;
    require_connected(&session, &rid)?;
    session.touch();

    timeout(ACCOUNT_OP_TIMEOUT, session.client.set_status_message(&req.status))
        .await
        .map_err(|_| ApiError::timeout("status update timed out").rid(&rid))?
        .map_err(|err| map_client(err, "status_update_failed", "failed to set status", &rid))?;

    Ok(Json(json!({
        "success": true,
        "request_id": rid.0,
    })))
}

/// GET /v1/account/user_info?wa_account_id=...&phone=a,b,c
pub async fn user_info(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let phones = required_query(&params, "phone", &rid)?;
    let jids: Vec<Jid> = phones
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| jid_from_phone_or_jid(p, &rid))
        .collect::<Result<_, _>>()?;
    if jids.is_empty() {
        return Err(ApiError::invalid_request("phone is required").rid(&rid));
    }

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let users = timeout(ACCOUNT_OP_TIMEOUT, session.client.user_info(&jids))
        .await
        .map_err(|_| ApiError::timeout("user info timed out").rid(&rid))?
        .map_err(|err| map_client(err, "user_fetch_failed", "failed to get user info", &rid))?;

    Ok(Json(json!({
        "users": users,
        "request_id": rid.0,
    })))
}

/// GET /v1/account/business_profile?wa_account_id=...&jid=...
pub async fn business_profile(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let jid = parse_jid(required_query(&params, "jid", &rid)?, "user", &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let profile = timeout(ACCOUNT_OP_TIMEOUT, session.client.business_profile(&jid))
        .await
        .map_err(|_| ApiError::timeout("business profile timed out").rid(&rid))?
        .map_err(|err| {
            map_client(err, "profile_fetch_failed", "failed to get business profile", &rid)
        })?;

    Ok(Json(json!({
        "profile": profile,
        "request_id": rid.0,
    })))
}

/// GET /v1/account/privacy?wa_account_id=...
pub async fn privacy_settings(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let settings = timeout(ACCOUNT_OP_TIMEOUT, session.client.privacy_settings())
        .await
        .map_err(|_| ApiError::timeout("privacy settings timed out").rid(&rid))?
        .map_err(|err| {
            map_client(err, "privacy_fetch_failed", "failed to get privacy settings", &rid)
        })?;

    Ok(Json(json!({
        "privacy": settings,
        "request_id": rid.0,
    })))
}

/// GET /v1/account/user_check?wa_account_id=...&phone=a,b,c
pub async fn check_user_exists(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;
    let phones: Vec<String> = required_query(&params, "phone", &rid)?
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if phones.is_empty() {
        return Err(ApiError::invalid_request("phone is required").rid(&rid));
    }

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let results = timeout(ACCOUNT_OP_TIMEOUT, session.client.check_users(&phones))
        .await
        .map_err(|_| ApiError::timeout("user check timed out").rid(&rid))?
        .map_err(|err| map_client(err, "user_fetch_failed", "failed to check users", &rid))?;

    Ok(Json(json!({
        "results": results,
        "request_id": rid.0,
    })))
}
