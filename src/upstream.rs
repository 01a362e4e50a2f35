//! Shared plumbing for the third-party movie APIs.

use std::time::Duration;
use thiserror::Error;

const TIMEOUT: Duration = Duration::from_secs(15);

/// Placeholder keys copied from `.env.example` files.
const DUMMY_KEYS: [&str; 5] = ["DUMMY", "YOUR_OMDB_KEY", "YOUR_TMDB_KEY", "YOUR_KEY", "YOURKEY"];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{service} API key missing or dummy; set {var} in .env")]
    MissingKey {
        service: &'static str,
        var: &'static str,
    },
    #[error("{service} API error: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// Returns the key unless it is absent or a known placeholder.
pub fn require_key<'a>(
    key: Option<&'a str>,
    service: &'static str,
    var: &'static str,
) -> Result<&'a str, UpstreamError> {
    match key.map(str::trim) {
        Some(k) if !k.is_empty() && !DUMMY_KEYS.contains(&k.to_uppercase().as_str()) => Ok(k),
        _ => Err(UpstreamError::MissingKey { service, var }),
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
