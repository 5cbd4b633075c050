//! Small text and clock helpers shared by config parsing and the HTTP adapters.

const ERROR_BODY_LIMIT: usize = 180;

/// Trim optional text, mapping blank values to `None`.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let trimmed = value?.trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

pub fn is_http_url(value: &str) -> bool {
    ["http://", "https://"]
        .iter()
        .any(|scheme| value.starts_with(scheme))
}

/// First characters of a response body, for embedding in error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(ERROR_BODY_LIMIT).collect()
}

/// Wall-clock time in Unix milliseconds, the unit of snapshot write timestamps.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
