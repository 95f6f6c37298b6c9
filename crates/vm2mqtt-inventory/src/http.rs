//! Shared HTTP plumbing for the REST-based providers.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;

use crate::error::{InventoryError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a `reqwest::Client` with the provider's default headers.
///
/// `verify_ssl = false` accepts self-signed certificates, which is the
/// common case for homelab hypervisors.
pub(crate) fn build_client(headers: HeaderMap, verify_ssl: bool) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .default_headers(headers)
        .danger_accept_invalid_certs(!verify_ssl)
        .build()
        .map_err(|e| InventoryError::Config(format!("failed to build HTTP client: {e}")))
}

/// Send a request and fail with `BackendUnavailable` on transport errors or
/// non-success statuses. The error body is logged.
pub(crate) async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
    let response = request
        .send()
        .await
        .map_err(|e| InventoryError::BackendUnavailable(format!("request failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        url = %url,
        status = %status,
        body = %body,
        "Backend returned an error status"
    );
    Err(InventoryError::BackendUnavailable(format!(
        "{url} returned {status}"
    )))
}

/// Send a request and decode a JSON body.
pub(crate) async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T> {
    send(request)
        .await?
        .json::<T>()
        .await
        .map_err(|e| InventoryError::InvalidResponse(format!("failed to parse response: {e}")))
}
