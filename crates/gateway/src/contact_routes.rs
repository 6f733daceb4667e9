//! Contact listing.

use std::{collections::HashMap, time::Duration};

use {
    axum::{
        extract::{Query, State},
        response::Json,
    },
    serde_json::{Value, json},
    tokio::time::timeout,
};

use crate::{
    error::{ApiError, ApiResult},
    extract::{map_client, require_connected, required_query},
    request_id::Rid,
    state::AppState,
};

const CONTACT_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// GET /v1/contacts?wa_account_id=...
pub async fn list_contacts(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let contacts = timeout(CONTACT_OP_TIMEOUT, session.client.contacts())
        .await
        .map_err(|_| ApiError::timeout("contact list timed out").rid(&rid))?
        .map_err(|err| {
            map_client(err, "contacts_fetch_failed", "failed to get contacts", &rid)
        })?;

    Ok(Json(json!({
        "contacts": contacts,
        "count": contacts.len(),
        "request_id": rid.0,
    })))
}
