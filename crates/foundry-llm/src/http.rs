//! HTTP plumbing shared by the provider adapters.

use foundry_types::FoundryError;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map a non-success HTTP status to the error taxonomy.
///
/// 429 is rate limiting, 401/403 are credential failures, 408 and 5xx
/// (including Anthropic's 529 "overloaded") are transient, anything else is a
/// permanent provider error.
pub(crate) fn map_status(provider: &str, status: u16, body: &str) -> FoundryError {
    match status {
        429 => FoundryError::RateLimited {
            provider: provider.into(),
            retry_after_ms: retry_after_ms(body).unwrap_or(1000),
        },
        401 | 403 => FoundryError::AuthError {
            provider: provider.into(),
        },
        408 | 500..=599 => FoundryError::ProviderError {
            provider: provider.into(),
            status,
            message: extract_error_message(body),
            retryable: true,
        },
        _ => FoundryError::ProviderError {
            provider: provider.into(),
            status,
            message: extract_error_message(body),
            retryable: false,
        },
    }
}

fn retry_after_ms(body: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["retry_after"].as_f64())
        .map(|s| (s * 1000.0) as u64)
}

/// Pull `error.message` (or a bare string `error`) out of a JSON error body.
pub(crate) fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            v["error"]["message"]
                .as_str()
                .or_else(|| v["error"].as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

fn transport_error(provider: &str, e: reqwest::Error) -> FoundryError {
    FoundryError::ProviderError {
        provider: provider.into(),
        status: 0,
        message: e.to_string(),
        retryable: true,
    }
}

// ---------------------------------------------------------------------------
// POST helper
// ---------------------------------------------------------------------------

/// POST a JSON body and decode a JSON reply, mapping failures per provider.
pub(crate) async fn post_json(
    provider: &str,
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value, FoundryError> {
    let resp = request
        .header("content-type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| transport_error(provider, e))?;

    let status = resp.status();
    let text = resp.text().await.map_err(|e| transport_error(provider, e))?;

    if !status.is_success() {
        return Err(map_status(provider, status.as_u16(), &text));
    }

    serde_json::from_str(&text).map_err(|e| FoundryError::ProviderError {
        provider: provider.into(),
        status: status.as_u16(),
        message: format!("Failed to parse response JSON: {e}"),
        retryable: false,
    })
}
