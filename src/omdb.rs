//! OMDb client: movie search and lookup by IMDb id.

use crate::upstream::{http_client, require_key, UpstreamError};
use serde_json::Value;

const SERVICE: &str = "OMDb";
const KEY_VAR: &str = "OMDB_API_KEY";
pub const BASE_URL: &str = "https://www.omdbapi.com";

#[derive(Debug, Clone)]
pub struct OmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OmdbClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: http_client(),
            base_url: BASE_URL.to_string(),
            api_key,
        }
    }

    /// Title search, OMDb payload passed through as-is.
    pub async fn search(&self, query: &str) -> Result<Value, UpstreamError> {
        self.get(&[("s", query), ("type", "movie")]).await
    }

    /// Movie details. OMDb reports unknown ids with `"Response": "False"`.
    pub async fn movie(&self, imdb_id: &str) -> Result<Value, UpstreamError> {
        self.get(&[("i", imdb_id), ("plot", "short")]).await
    }

    async fn get(&self, params: &[(&str, &str)]) -> Result<Value, UpstreamError> {
        let key = require_key(self.api_key.as_deref(), SERVICE, KEY_VAR)?;
        let http_err = |source| UpstreamError::Http { service: SERVICE, source };

        self.http
            .get(&self.base_url)
            .query(params)
            .query(&[("apikey", key)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?
            .json::<Value>()
            .await
            .map_err(http_err)
    }
}

/// Whether an OMDb payload describes a found movie.
pub fn is_found(payload: &Value) -> bool {
    payload.get("Response").and_then(Value::as_str) == Some("True")
}
