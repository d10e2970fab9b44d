use url::Url;

use crate::error::ChatApiError;

/// Default backend origin.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Join a backend base URL and an absolute endpoint path.
///
/// An empty base falls back to [`DEFAULT_BASE_URL`]. Trailing slashes on the base and
/// leading slashes on the path collapse to exactly one separator; a query string on the
/// path is kept.
pub fn endpoint_url(base: &str, path: &str) -> Result<String, ChatApiError> {
    let base = if base.trim().is_empty() {
        DEFAULT_BASE_URL
    } else {
        base.trim()
    };

    let parsed = Url::parse(base)
        .map_err(|error| ChatApiError::InvalidBaseUrl(format!("{base}: {error}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ChatApiError::InvalidBaseUrl(format!(
            "{base}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let trimmed = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    Ok(format!("{trimmed}/{path}"))
}
