//! Newsletter listing.

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

const NEWSLETTER_OP_TIMEOUT: Duration = Duration::from_secs(10);

/// GET /v1/newsletters?wa_account_id=...
pub async fn list_newsletters(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    rid: Rid,
) -> ApiResult<Json<Value>> {
    let account_id = required_query(&params, "wa_account_id", &rid)?;

    let session = state.session(account_id, &rid).await?;
    require_connected(&session, &rid)?;

    let newsletters = timeout(
        NEWSLETTER_OP_TIMEOUT,
        session.client.subscribed_newsletters(),
    )
    .await
    .map_err(|_| ApiError::timeout("newsletter list timed out").rid(&rid))?
    .map_err(|err| {
        map_client(err, "newsletters_fetch_failed", "failed to get newsletters", &rid)
    })?;

    Ok(Json(json!({
        "newsletters": newsletters,
        "count": newsletters.len(),
        "request_id": rid.0,
    })))
}
