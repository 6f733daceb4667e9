//! Pairing, reconnect, logout and status endpoints.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        body::Bytes,
        extract::{Path, State},
        response::Json,
    },
    base64::Engine as _,
    serde::Deserialize,
    serde_json::{Value, json},
    tokio::time::timeout,
    tracing::{error, info},
};

use {
    wagate_client::{PairingUpdate, ProtocolClient},
    wagate_store::DeviceStore,
    wagate_webhook::{Deliver, Envelope},
};

use crate::{
    error::{ApiError, ApiResult},
    extract::{map_client, parse_body},
    request_id::Rid,
    state::AppState,
};

/// How long the QR endpoint waits for the first pairing update.
const PAIRING_TIMEOUT: Duration = Duration::from_secs(30);
const LOGOUT_TIMEOUT: Duration = Duration::from_secs(10);
/// Phone pairing codes are valid for five minutes.
const PAIR_CODE_EXPIRES_IN: u64 = 300;
/// Rendered QR image edge length in pixels.
const QR_IMAGE_SIZE: u32 = 256;

/// Kick off `connect` without tying it to the request; failures surface to
/// the tenant as a `status: failed` webhook.
fn connect_in_background(state: &AppState, account_id: &str, client: Arc<dyn ProtocolClient>) {
    let webhooks = Arc::clone(&state.webhooks);
    let account_id = account_id.to_string();
    tokio::spawn(async move {
        if let Err(err) = client.connect().await {
            error!(account_id, error = %err, "background connect failed");
            let envelope = Envelope::status(&account_id, "failed", &err.to_string());
            if let Err(err) = webhooks.deliver(&envelope).await {
                error!(account_id, error = %err, "failed to deliver connect-failure status");
            }
        }
    });
}

fn qr_png_base64(code: &str, rid: &Rid) -> Result<String, ApiError> {
    let qr = qrcode::QrCode::new(code.as_bytes()).map_err(|err| {
        error!(error = %err, "QR encoding failed");
        ApiError::upstream("pairing_failed", "failed to generate QR code").rid(rid)
    })?;
    let image = qr
        .render::<image::Luma<u8>>()
        .min_dimensions(QR_IMAGE_SIZE, QR_IMAGE_SIZE)
        .build();

    let mut png = Vec::new();
    image::DynamicImage::ImageLuma8(image)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|err| {
            error!(error = %err, "QR PNG encoding failed");
            ApiError::upstream("pairing_failed", "failed to encode QR code").rid(rid)
        })?;
    Ok(base64::engine::general_purpose::STANDARD.encode(&png))
}

/// POST /v1/sessions/{account_id}/qr
pub async fn start_qr(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let session = state.session(&account_id, &rid).await?;
    if session.client.is_connected() {
        return Err(ApiError::already_connected().rid(&rid));
    }

    let mut updates = session.client.start_qr_pairing().await.map_err(|err| {
        map_client(err, "pairing_failed", "failed to initialize QR pairing", &rid)
    })?;
    connect_in_background(&state, &account_id, Arc::clone(&session.client));

    let update = timeout(PAIRING_TIMEOUT, updates.recv())
        .await
        .map_err(|_| ApiError::timeout("timed out waiting for QR code").rid(&rid))?;

    match update {
        Some(PairingUpdate::Code { code, timeout }) => {
            let qr_code = qr_png_base64(&code, &rid)?;
            info!(request_id = rid.0, account_id, "QR code issued");
            Ok(Json(json!({
                "qr_code": qr_code,
                "expires_at": chrono::Utc::now() + timeout,
                "session_state": "awaiting_scan",
                "request_id": rid.0,
            })))
        },
        Some(PairingUpdate::Success) => Ok(Json(json!({
            "success": true,
            "session_state": "connected",
            "message": "successfully paired",
            "request_id": rid.0,
        }))),
        Some(PairingUpdate::Timeout) => {
            Err(ApiError::timeout("QR code expired").rid(&rid))
        },
        Some(PairingUpdate::Error(message)) => {
            error!(request_id = rid.0, account_id, error = message, "QR pairing error");
            Err(ApiError::upstream("pairing_failed", message).rid(&rid))
        },
        None => Err(ApiError::upstream("pairing_failed", "pairing channel closed").rid(&rid)),
    }
}

#[derive(Deserialize)]
struct PairRequest {
    phone_number: String,
}

/// POST /v1/sessions/{account_id}/pair
pub async fn pair_with_code(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    rid: Rid,
    bytes: Bytes,
) -> ApiResult<Json<Value>> {
    let req: PairRequest = parse_body(&bytes, &rid)?;
    if req.phone_number.is_empty() {
        return Err(ApiError::invalid_request("phone_number is required").rid(&rid));
    }

    let session = state.session(&account_id, &rid).await?;
    if session.client.is_connected() {
        return Err(ApiError::already_connected().rid(&rid));
    }

    let code = session
        .client
        .pair_phone(&req.phone_number)
        .await
        .map_err(|err| {
            map_client(err, "pairing_failed", "failed to request pairing code", &rid)
        })?;
    connect_in_background(&state, &account_id, Arc::clone(&session.client));

    info!(request_id = rid.0, account_id, "pairing code issued");
    Ok(Json(json!({
        "success": true,
        "pairing_code": code,
        "expires_in": PAIR_CODE_EXPIRES_IN,
        "message": "enter this code on your phone to pair",
        "request_id": rid.0,
    })))
}

/// POST /v1/sessions/{account_id}/reconnect
pub async fn reconnect(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let session = state.session(&account_id, &rid).await?;
    if session.client.is_connected() {
        return Err(ApiError::already_connected().rid(&rid));
    }
    connect_in_background(&state, &account_id, Arc::clone(&session.client));

    Ok(Json(json!({
        "success": true,
        "message": "reconnection initiated",
        "request_id": rid.0,
    })))
}

/// POST /v1/sessions/{account_id}/logout
///
/// Terminates the upstream session, forgets the device credentials, and
/// drops the registry entry. A later call for the same account starts from a
/// fresh device.
pub async fn logout(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let session = state.session(&account_id, &rid).await?;

    timeout(LOGOUT_TIMEOUT, session.client.logout())
        .await
        .map_err(|_| ApiError::timeout("logout timed out").rid(&rid))?
        .map_err(|err| map_client(err, "logout_failed", "failed to logout", &rid))?;

    if let Err(err) = state.devices.delete_device(&account_id).await {
        error!(request_id = rid.0, account_id, error = %err, "failed to delete device mapping");
        return Err(ApiError::upstream("logout_failed", "failed to forget device").rid(&rid));
    }
    state.sessions.remove(&account_id).await;

    info!(request_id = rid.0, account_id, "logged out");
    Ok(Json(json!({
        "success": true,
        "message": "successfully logged out",
        "request_id": rid.0,
    })))
}

/// GET /v1/sessions/{account_id}/status
pub async fn status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let session = state.session(&account_id, &rid).await?;

    let connected = session.client.is_connected();
    let logged_in = session.client.is_logged_in();
    let status = if connected {
        "connected"
    } else if logged_in {
        "logged_in"
    } else {
        "disconnected"
    };
    let jid = session
        .client
        .self_jid()
        .map(|jid| jid.to_string())
        .unwrap_or_default();

    Ok(Json(json!({
        "wa_account_id": account_id,
        "status": status,
        "jid": jid,
        "connected": connected,
        "logged_in": logged_in,
        "request_id": rid.0,
    })))
}
