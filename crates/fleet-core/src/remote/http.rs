//! Shared HTTP plumbing for the remote backends.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{RemoteError, RemoteResult};
use crate::util::{compact_text, is_http_url, normalize_text_option};

pub(super) fn build_client(timeout: Duration) -> RemoteResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| RemoteError::InvalidConfiguration(error.to_string()))
}

pub(super) fn normalize_base_url(raw: &str) -> RemoteResult<String> {
    let base_url = normalize_text_option(Some(raw.to_string())).ok_or_else(|| {
        RemoteError::InvalidConfiguration("base URL must not be empty".to_string())
    })?;
    if is_http_url(&base_url) {
        Ok(base_url.trim_end_matches('/').to_string())
    } else {
        Err(RemoteError::InvalidConfiguration(
            "base URL must include http:// or https://".to_string(),
        ))
    }
}

/// Timeouts and connection failures are both reported as `Network`.
pub(super) fn map_transport_error(error: &reqwest::Error) -> RemoteError {
    if error.is_decode() {
        RemoteError::InvalidPayload(error.to_string())
    } else if error.is_builder() {
        RemoteError::InvalidConfiguration(error.to_string())
    } else if error.is_timeout() {
        RemoteError::Network(format!("request timed out: {error}"))
    } else {
        RemoteError::Network(error.to_string())
    }
}

/// Pass successful responses through; map everything else to a [`RemoteError`].
pub(super) async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

pub(super) async fn read_json<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let body = response
        .text()
        .await
        .map_err(|error| map_transport_error(&error))?;
    serde_json::from_str(&body).map_err(|error| {
        RemoteError::InvalidPayload(format!("{error}: {}", compact_text(&body)))
    })
}

fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let message = parse_api_error(status, body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::Auth(message),
        StatusCode::NOT_FOUND => RemoteError::NotFound(message),
        _ => RemoteError::Server(message),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}
