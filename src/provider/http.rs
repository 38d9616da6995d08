//! Shared HTTP client and auth header utilities.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};

use crate::error::RealtalkError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// No request timeout is configured: only the session duration is bounded.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new())
    })
}

/// Build headers for a Bearer-token request with the given content type.
pub fn bearer_headers(token: &str, content_type: &'static str) -> Result<HeaderMap, RealtalkError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
        RealtalkError::Configuration(format!("Invalid bearer credential: {e}"))
    })?;
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// Append a single query parameter, respecting an existing query string.
pub fn with_query_param(url: &str, key: &str, value: &str) -> Result<String, RealtalkError> {
    let mut parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| RealtalkError::Configuration(format!("Invalid URL '{url}': {e}")))?;
    parsed.query_pairs_mut().append_pair(key, value);
    Ok(parsed.into())
}

/// Read a response body for error reporting without failing on decode errors.
pub async fn error_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}
