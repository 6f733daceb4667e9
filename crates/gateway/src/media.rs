use std::time::Duration;

use crate::{error::ApiError, request_id::Rid};

/// Deadline for fetching tenant-supplied media URLs.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Download a media payload from a tenant-supplied URL.
///
/// Only http(s) schemes are accepted; anything else is a validation error,
/// not an upstream failure.
pub async fn fetch(http: &reqwest::Client, url: &str, rid: &Rid) -> Result<Vec<u8>, ApiError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ApiError::invalid_request("media_url must be http(s)").rid(rid));
    }

    let response = tokio::time::timeout(FETCH_TIMEOUT, http.get(url).send())
        .await
        .map_err(|_| ApiError::timeout("media download timed out").rid(rid))?
        .map_err(|err| {
            tracing::error!(url, error = %err, "media download failed");
            ApiError::upstream("media_fetch_failed", "failed to download media").rid(rid)
        })?;

    if !response.status().is_success() {
        tracing::error!(url, status = response.status().as_u16(), "media URL returned error");
        return Err(ApiError::upstream("media_fetch_failed", "failed to download media").rid(rid));
    }

    let bytes = response.bytes().await.map_err(|err| {
        tracing::error!(url, error = %err, "media download body failed");
        ApiError::upstream("media_fetch_failed", "failed to download media").rid(rid)
    })?;
    Ok(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let http = reqwest::Client::new();
        let rid = Rid("test".into());
        let err = fetch(&http, "file:///etc/passwd", &rid).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
        let err = fetch(&http, "ftp://host/file", &rid).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }
}
