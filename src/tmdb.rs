//! TMDb client: IMDb id resolution and review pages.

use crate::reviews::Review;
use crate::upstream::{http_client, require_key, UpstreamError};
use serde::de::DeserializeOwned;
use serde::Deserialize;

const SERVICE: &str = "TMDb";
const KEY_VAR: &str = "TMDB_API_KEY";
pub const BASE_URL: &str = "https://api.themoviedb.org/3";
/// Upper bound on pages fetched by one import.
pub const MAX_IMPORT_PAGES: u32 = 50;

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    movie_results: Vec<FindResult>,
}

#[derive(Debug, Deserialize)]
struct FindResult {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ReviewsPage {
    #[serde(default)]
    results: Vec<TmdbReview>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TmdbReview {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl From<TmdbReview> for Review {
    fn from(r: TmdbReview) -> Self {
        Review::new(
            r.content.unwrap_or_default(),
            Some(format!("tmdb:{}", r.author.unwrap_or_default())),
            r.created_at,
        )
    }
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl TmdbClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            http: http_client(),
            base_url: BASE_URL.to_string(),
            api_key,
        }
    }

    /// TMDb movie id for an IMDb id, `None` when TMDb does not know it.
    pub async fn find_tmdb_id(&self, imdb_id: &str) -> Result<Option<u64>, UpstreamError> {
        let found: FindResponse = self
            .get(&format!("find/{}", imdb_id), &[("external_source", "imdb_id")])
            .await?;
        Ok(found.movie_results.first().map(|m| m.id))
    }

    pub async fn reviews(&self, tmdb_id: u64, page: u32) -> Result<Vec<TmdbReview>, UpstreamError> {
        let page = page.to_string();
        let body: ReviewsPage = self
            .get(&format!("movie/{}/reviews", tmdb_id), &[("page", page.as_str())])
            .await?;
        Ok(body.results)
    }

    /// Reviews from pages `1..=max_pages` (at most [`MAX_IMPORT_PAGES`]), in
    /// page order. Stops at the first empty page.
    pub async fn import_reviews(&self, tmdb_id: u64, max_pages: u32) -> Result<Vec<Review>, UpstreamError> {
        let mut rows = Vec::new();
        for page in 1..=page_limit(max_pages) {
            let results = self.reviews(tmdb_id, page).await?;
            if results.is_empty() {
                break;
            }
            rows.extend(usable_reviews(results));
        }
        Ok(rows)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, &str)]) -> Result<T, UpstreamError> {
        let key = require_key(self.api_key.as_deref(), SERVICE, KEY_VAR)?;
        let http_err = |source| UpstreamError::Http { service: SERVICE, source };
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), path);

        self.http
            .get(url)
            .query(&[("api_key", key)])
            .query(params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_err)?
            .json::<T>()
            .await
            .map_err(http_err)
    }
}

fn page_limit(requested: u32) -> u32 {
    requested.min(MAX_IMPORT_PAGES)
}

/// Converts a page of TMDb reviews, dropping those without text.
fn usable_reviews(results: Vec<TmdbReview>) -> impl Iterator<Item = Review> {
    results
        .into_iter()
        .map(Review::from)
        .filter(|r| !r.text.trim().is_empty())
}
