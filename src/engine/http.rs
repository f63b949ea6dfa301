// ── Skiff Engine: HTTP retry utilities ─────────────────────────────────────
// Shared by both chat-completions providers.
//
//   • Exponential backoff with ±25% jitter (base 1s, cap 30s)
//   • Retry on 429 (rate limit), 500, 502, 503, 504, 529
//   • Respects the `Retry-After` header
//   • One pre-configured reqwest::Client per provider

use std::time::{Duration, SystemTime};

use reqwest::Client;

use crate::atoms::constants::PROVIDER_TIMEOUT_SECS;

/// Maximum number of retry attempts per request. 4xx is never retried.
pub const MAX_RETRIES: u32 = 2;

const INITIAL_RETRY_DELAY_MS: u64 = 1_000;
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Check if an HTTP status code represents a transient/retryable error.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

/// Sleep with exponential backoff + ±25% jitter, honoring a server-specified
/// Retry-After when present. Returns the applied delay for logging.
pub async fn retry_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(10));
    let capped_ms = base_ms.min(MAX_RETRY_DELAY_MS);
    let delay_ms = match retry_after_secs {
        Some(secs) => (secs.min(60) * 1000).max(capped_ms),
        None => capped_ms,
    };
    let delay = Duration::from_millis(apply_jitter(delay_ms));
    tokio::time::sleep(delay).await;
    delay
}

/// Apply ±25% jitter to prevent thundering-herd effects.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = base_ms / 4;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64)
        .unwrap_or(0);
    base_ms - jitter_range / 2 + nanos % jitter_range
}

/// Parse a Retry-After header value (delta-seconds form only).
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    header_value.trim().parse::<u64>().ok()
}

/// HTTP client with the provider round-trip timeout applied.
pub fn provider_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
        .build()
        .unwrap_or_default()
}
