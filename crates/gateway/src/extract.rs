//! Shared request-parsing helpers for the route modules.
//!
//! Bodies are parsed manually from bytes (rather than through the `Json`
//! extractor) so every validation failure produces the standard error body
//! with the request id included.

use std::collections::HashMap;

use {axum::body::Bytes, serde::de::DeserializeOwned, tracing::error};

use {
    wagate_client::{ClientError, Jid},
    wagate_session::ManagedSession,
};

use crate::{error::ApiError, request_id::Rid};

pub fn parse_body<T: DeserializeOwned>(bytes: &Bytes, rid: &Rid) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|err| ApiError::invalid_request(err.to_string()).rid(rid))
}

pub fn parse_jid(raw: &str, what: &str, rid: &Rid) -> Result<Jid, ApiError> {
    Jid::parse(raw).map_err(|_| ApiError::invalid_request(format!("invalid {what} JID")).rid(rid))
}

pub fn require_connected(session: &ManagedSession, rid: &Rid) -> Result<(), ApiError> {
    if session.client.is_connected() {
        Ok(())
    } else {
        Err(ApiError::not_connected().rid(rid))
    }
}

pub fn required_query<'a>(
    params: &'a HashMap<String, String>,
    key: &str,
    rid: &Rid,
) -> Result<&'a str, ApiError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::invalid_request(format!("{key} is required")).rid(rid))
}

/// Map an upstream failure to its API surface: connection state and timeouts
/// keep their canonical kinds, everything else gets the caller's label with a
/// sanitized message. The raw error is logged here.
pub fn map_client(err: ClientError, label: &'static str, human: &str, rid: &Rid) -> ApiError {
    match err {
        ClientError::NotConnected => ApiError::not_connected().rid(rid),
        ClientError::Timeout => ApiError::timeout(human.to_string()).rid(rid),
        other => {
            error!(request_id = rid.0, error = %other, label, "upstream call failed");
            ApiError::upstream(label, human.to_string()).rid(rid)
        },
    }
}
