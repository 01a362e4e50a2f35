use crate::classifier::{ClassifierStatus, SentimentClassifier};
use crate::ml::Prediction;
use crate::omdb::{self, OmdbClient};
use crate::reviews::{self, Review};
use crate::store::{self, Store};
use crate::summary::{self, AnalysisRow, Summary};
use crate::tmdb::TmdbClient;
use crate::upstream::UpstreamError;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

pub struct AppState {
    pub store: Store,
    pub classifier: Arc<SentimentClassifier>,
    pub omdb: OmdbClient,
    pub tmdb: TmdbClient,
    pub frontend_dir: PathBuf,
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(msg) = &self {
            error!("internal error: {}", msg);
        }
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", e))
    }
}

impl From<UpstreamError> for ApiError {
    fn from(e: UpstreamError) -> Self {
        warn!(error = %e, "upstream unavailable");
        ApiError::Unavailable(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn check_id(imdb_id: &str) -> ApiResult<()> {
    if store::is_valid_movie_id(imdb_id) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(format!("Invalid movie id: {}", imdb_id)))
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub ok: bool,
    pub status: String,
    pub version: String,
    pub classifier: ClassifierStatus,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchQuery {
    /// Title to search for
    pub query: String,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GenerateQuery {
    /// Number of mock reviews (default 40)
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ImportQuery {
    /// Review pages to fetch (default 1)
    pub max_pages: Option<u32>,
}

#[allow(dead_code)]
#[derive(ToSchema)]
pub struct UploadForm {
    /// `.csv` with a `text,source,timestamp` header, or a JSON array of reviews
    #[schema(value_type = String, format = Binary)]
    pub file: Vec<u8>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub ok: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl CountResponse {
    fn ok(count: usize) -> Self {
        Self { ok: true, count, total: None, note: None, msg: None }
    }

    fn note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AddReviewRequest {
    #[serde(default)]
    pub text: String,
    pub source: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AddReviewResponse {
    pub ok: bool,
    pub count: usize,
    pub added: Review,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReviewsResponse {
    pub imdb_id: String,
    pub count: usize,
    pub reviews: Vec<Review>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalysisResponse {
    pub imdb_id: String,
    pub rows: Vec<AnalysisRow>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AnalyzeTextRequest {
    #[serde(default)]
    pub text: String,
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = tower_http::services::ServeDir::new(&state.frontend_dir);

    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/movies/search", get(movie_search))
        .route("/api/movies/:imdb_id", get(movie_get))
        .route("/api/reviews/:imdb_id", get(get_reviews))
        .route("/api/reviews/:imdb_id/upload", post(upload_reviews))
        .route("/api/reviews/:imdb_id/use-sample", post(use_sample))
        .route("/api/reviews/:imdb_id/generate", post(generate_reviews))
        .route("/api/reviews/:imdb_id/add", post(add_review))
        .route("/api/reviews/:imdb_id/import/tmdb", post(import_tmdb))
        .route("/api/analyze/:imdb_id", post(analyze))
        .route("/api/summary/:imdb_id", get(get_summary))
        .route("/api/analysis/:imdb_id", get(get_analysis))
        .route("/api/export/:file", get(export_csv))
        .route("/api/analyze-text", post(analyze_text))
        .nest_service("/static", static_dir)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ============================================================================
// Handlers
// ============================================================================

const FALLBACK_INDEX: &str = r#"<html>
    <head><title>Movie Sentiment Analyzer</title></head>
    <body>
        <h1>Movie Sentiment Analyzer</h1>
        <p>API is running! Frontend files not found.</p>
        <p><a href="/swagger-ui">API Documentation</a></p>
        <p><a href="/api/health">Health Check</a></p>
    </body>
</html>"#;

pub async fn index(State(state): State<Arc<AppState>>) -> Html<String> {
    match tokio::fs::read_to_string(state.frontend_dir.join("index.html")).await {
        Ok(page) => Html(page),
        Err(_) => Html(FALLBACK_INDEX.to_string()),
    }
}

/// Service and classifier status
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "service"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        classifier: state.classifier.status(),
    })
}

/// Search OMDb by title
#[utoipa::path(
    get,
    path = "/api/movies/search",
    params(SearchQuery),
    responses(
        (status = 200, description = "OMDb search payload"),
        (status = 503, description = "OMDb unavailable")
    ),
    tag = "movies"
)]
pub async fn movie_search(
    State(state): State<Arc<AppState>>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
    let Query(q) = query?;
    Ok(Json(state.omdb.search(&q.query).await?))
}

/// Movie details, cached locally; served from cache when OMDb is unavailable
#[utoipa::path(
    get,
    path = "/api/movies/{imdb_id}",
    params(("imdb_id" = String, Path, description = "IMDb id, e.g. tt1160419")),
    responses(
        (status = 200, description = "OMDb movie payload"),
        (status = 503, description = "OMDb unavailable and nothing cached")
    ),
    tag = "movies"
)]
pub async fn movie_get(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
) -> ApiResult<Json<Value>> {
    check_id(&imdb_id)?;
    match state.omdb.movie(&imdb_id).await {
        Ok(meta) => {
            if omdb::is_found(&meta) {
                state.store.save_movie_meta(&imdb_id, &meta).await?;
            }
            Ok(Json(meta))
        }
        Err(e) => match state.store.load_movie_meta(&imdb_id).await? {
            Some(cached) => {
                info!(imdb_id = %imdb_id, error = %e, "serving cached movie metadata");
                Ok(Json(cached))
            }
            None => Err(e.into()),
        },
    }
}

/// Stored reviews, without labels
#[utoipa::path(
    get,
    path = "/api/reviews/{imdb_id}",
    params(("imdb_id" = String, Path, description = "Movie id")),
    responses((status = 200, description = "Raw reviews", body = ReviewsResponse)),
    tag = "reviews"
)]
pub async fn get_reviews(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
) -> ApiResult<Json<ReviewsResponse>> {
    check_id(&imdb_id)?;
    let reviews = state.store.load_reviews(&imdb_id).await?.unwrap_or_default();
    Ok(Json(ReviewsResponse {
        imdb_id,
        count: reviews.len(),
        reviews,
    }))
}

/// Replace reviews with an uploaded CSV or JSON file
#[utoipa::path(
    post,
    path = "/api/reviews/{imdb_id}/upload",
    params(("imdb_id" = String, Path, description = "Movie id")),
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Reviews stored", body = CountResponse),
        (status = 400, description = "Missing or unparsable file")
    ),
    tag = "reviews"
)]
pub async fn upload_reviews(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
    multipart: Option<Multipart>,
) -> ApiResult<Json<CountResponse>> {
    check_id(&imdb_id)?;
    let missing = || ApiError::BadRequest("Please upload a CSV or JSON file, or use /use-sample".to_string());
    let mut multipart = multipart.ok_or_else(missing)?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field.file_name().unwrap_or_default().to_string();
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;
            upload = Some((filename, bytes));
            break;
        }
    }
    let (filename, bytes) = upload.ok_or_else(missing)?;

    let reviews = reviews::parse_upload(&filename, &bytes)
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse file: {:#}", e)))?;
    if reviews.is_empty() {
        return Err(ApiError::BadRequest("No valid reviews found".to_string()));
    }

    state.store.save_reviews(&imdb_id, &reviews).await?;
    info!(imdb_id = %imdb_id, count = reviews.len(), file = %filename, "reviews uploaded");
    Ok(Json(CountResponse::ok(reviews.len())))
}

/// Replace reviews with the bundled sample set
#[utoipa::path(
    post,
    path = "/api/reviews/{imdb_id}/use-sample",
    params(("imdb_id" = String, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Sample stored", body = CountResponse),
        (status = 400, description = "Sample not available")
    ),
    tag = "reviews"
)]
pub async fn use_sample(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
) -> ApiResult<Json<CountResponse>> {
    check_id(&imdb_id)?;
    let sample = state
        .store
        .load_sample()
        .await?
        .ok_or_else(|| ApiError::BadRequest("Sample not available".to_string()))?;
    state.store.save_reviews(&imdb_id, &sample).await?;
    Ok(Json(CountResponse::ok(sample.len()).note("used sample")))
}

/// Replace reviews with generated mock reviews
#[utoipa::path(
    post,
    path = "/api/reviews/{imdb_id}/generate",
    params(("imdb_id" = String, Path, description = "Movie id"), GenerateQuery),
    responses((status = 200, description = "Mock reviews stored", body = CountResponse)),
    tag = "reviews"
)]
pub async fn generate_reviews(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
    query: Result<Query<GenerateQuery>, QueryRejection>,
) -> ApiResult<Json<CountResponse>> {
    check_id(&imdb_id)?;
    let Query(q) = query?;
    let rows = reviews::generate_mock(q.count.unwrap_or(40), &mut rand::thread_rng(), chrono::Utc::now());
    state.store.save_reviews(&imdb_id, &rows).await?;
    Ok(Json(CountResponse::ok(rows.len()).note("mock reviews generated")))
}

/// Append a single review
#[utoipa::path(
    post,
    path = "/api/reviews/{imdb_id}/add",
    params(("imdb_id" = String, Path, description = "Movie id")),
    request_body = AddReviewRequest,
    responses(
        (status = 200, description = "Review appended", body = AddReviewResponse),
        (status = 400, description = "Missing text")
    ),
    tag = "reviews"
)]
pub async fn add_review(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
    body: Result<Json<AddReviewRequest>, JsonRejection>,
) -> ApiResult<Json<AddReviewResponse>> {
    check_id(&imdb_id)?;
    let Json(req) = body?;
    let text = req.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("Missing 'text'".to_string()));
    }

    let source = req
        .source
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "user".to_string());
    let added = Review::new(text, Some(source), Some(reviews::now_timestamp()));
    let count = state.store.append_reviews(&imdb_id, vec![added.clone()]).await?;
    Ok(Json(AddReviewResponse { ok: true, count, added }))
}

/// Import TMDb reviews and append them to the stored ones
#[utoipa::path(
    post,
    path = "/api/reviews/{imdb_id}/import/tmdb",
    params(("imdb_id" = String, Path, description = "IMDb id"), ImportQuery),
    responses(
        (status = 200, description = "Import result", body = CountResponse),
        (status = 503, description = "TMDb unavailable")
    ),
    tag = "reviews"
)]
pub async fn import_tmdb(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
    query: Result<Query<ImportQuery>, QueryRejection>,
) -> ApiResult<Json<CountResponse>> {
    check_id(&imdb_id)?;
    let Query(q) = query?;
    let Some(tmdb_id) = state.tmdb.find_tmdb_id(&imdb_id).await? else {
        return Ok(Json(CountResponse {
            ok: false,
            count: 0,
            total: None,
            note: None,
            msg: Some("Not found on TMDb".to_string()),
        }));
    };

    let rows = state.tmdb.import_reviews(tmdb_id, q.max_pages.unwrap_or(1)).await?;
    if rows.is_empty() {
        return Ok(Json(CountResponse {
            msg: Some("No reviews on TMDb".to_string()),
            ..CountResponse::ok(0)
        }));
    }

    let count = rows.len();
    let total = state.store.append_reviews(&imdb_id, rows).await?;
    info!(imdb_id = %imdb_id, tmdb_id, count, total, "imported TMDb reviews");
    Ok(Json(CountResponse {
        total: Some(total),
        ..CountResponse::ok(count)
    }))
}

/// Classify every stored review and replace the analysis snapshot
#[utoipa::path(
    post,
    path = "/api/analyze/{imdb_id}",
    params(("imdb_id" = String, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Analysis stored", body = CountResponse),
        (status = 404, description = "No reviews for this movie")
    ),
    tag = "analysis"
)]
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
) -> ApiResult<Json<CountResponse>> {
    check_id(&imdb_id)?;
    let reviews = state
        .store
        .load_reviews(&imdb_id)
        .await?
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ApiError::NotFound("No reviews uploaded/imported for this movie".to_string()))?;

    let texts: Vec<String> = reviews.iter().map(|r| r.text.clone()).collect();
    let predictions = classify_blocking(state.classifier.clone(), texts).await?;
    let rows = summary::build_rows(reviews, predictions);

    state.store.save_analysis(&imdb_id, &rows).await?;
    info!(imdb_id = %imdb_id, count = rows.len(), "analysis stored");
    Ok(Json(CountResponse::ok(rows.len())))
}

/// Aggregate statistics of the latest analysis
#[utoipa::path(
    get,
    path = "/api/summary/{imdb_id}",
    params(("imdb_id" = String, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Summary", body = Summary),
        (status = 404, description = "No analysis yet")
    ),
    tag = "analysis"
)]
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
) -> ApiResult<Json<Summary>> {
    check_id(&imdb_id)?;
    let rows = load_rows(&state, &imdb_id, "No analysis found; run /api/analyze first").await?;
    Ok(Json(summary::summarize(&imdb_id, &rows)))
}

/// Rows of the latest analysis
#[utoipa::path(
    get,
    path = "/api/analysis/{imdb_id}",
    params(("imdb_id" = String, Path, description = "Movie id")),
    responses(
        (status = 200, description = "Analysis rows", body = AnalysisResponse),
        (status = 404, description = "No analysis yet")
    ),
    tag = "analysis"
)]
pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(imdb_id): Path<String>,
) -> ApiResult<Json<AnalysisResponse>> {
    check_id(&imdb_id)?;
    let rows = load_rows(&state, &imdb_id, "No analysis found; run /api/analyze first").await?;
    Ok(Json(AnalysisResponse { imdb_id, rows }))
}

/// Latest analysis as CSV
#[utoipa::path(
    get,
    path = "/api/export/{imdb_id}.csv",
    params(("imdb_id" = String, Path, description = "Movie id")),
    responses(
        (status = 200, description = "CSV file", content_type = "text/csv"),
        (status = 404, description = "No analysis to export")
    ),
    tag = "analysis"
)]
pub async fn export_csv(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> ApiResult<Response> {
    let imdb_id = file
        .strip_suffix(".csv")
        .ok_or_else(|| ApiError::NotFound("Export path must end in .csv".to_string()))?;
    check_id(imdb_id)?;
    let rows = load_rows(&state, imdb_id, "No analysis to export").await?;
    let body = summary::export_csv(&rows)?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}_analysis.csv\"", imdb_id),
            ),
        ],
        body,
    )
        .into_response())
}

/// Classify one text without storing anything
#[utoipa::path(
    post,
    path = "/api/analyze-text",
    request_body = AnalyzeTextRequest,
    responses(
        (status = 200, description = "Prediction", body = Prediction),
        (status = 400, description = "Missing text")
    ),
    tag = "analysis"
)]
pub async fn analyze_text(
    State(state): State<Arc<AppState>>,
    body: Result<Json<AnalyzeTextRequest>, JsonRejection>,
) -> ApiResult<Json<Prediction>> {
    let Json(req) = body?;
    if req.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Missing 'text'".to_string()));
    }
    let classifier = state.classifier.clone();
    let prediction = tokio::task::spawn_blocking(move || classifier.classify_one(&req.text))
        .await
        .map_err(|e| ApiError::Internal(format!("classification task failed: {}", e)))?;
    Ok(Json(prediction))
}

async fn load_rows(state: &AppState, imdb_id: &str, missing: &str) -> ApiResult<Vec<AnalysisRow>> {
    state
        .store
        .load_analysis(imdb_id)
        .await?
        .filter(|rows| !rows.is_empty())
        .ok_or_else(|| ApiError::NotFound(missing.to_string()))
}

/// Runs the classifier off the async runtime; model inference is CPU-bound.
async fn classify_blocking(
    classifier: Arc<SentimentClassifier>,
    texts: Vec<String>,
) -> ApiResult<Vec<Prediction>> {
    tokio::task::spawn_blocking(move || classifier.predict(&texts))
        .await
        .map_err(|e| ApiError::Internal(format!("classification task failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassifierConfig;
    use crate::ml::Label;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    struct TestApp {
        _dir: tempfile::TempDir,
        state: Arc<AppState>,
    }

    async fn app() -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path().join("data"));
        store.init().await.unwrap();
        let config = ClassifierConfig { lightweight_mode: true, ..Default::default() };
        let state = Arc::new(AppState {
            store,
            classifier: Arc::new(SentimentClassifier::new(config)),
            omdb: OmdbClient::new(None),
            tmdb: TmdbClient::new(None),
            frontend_dir: dir.path().join("frontend"),
        });
        TestApp { _dir: dir, state }
    }

    async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Vec<u8>) {
        let resp = router(app.state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
        let (status, body) = send(app, req).await;
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_empty(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    fn multipart(uri: &str, filename: &str, content: &str) -> Request<Body> {
        let boundary = "XBOUNDARYX";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: application/octet-stream\r\n\r\n{c}\r\n--{b}--\r\n",
            b = boundary,
            f = filename,
            c = content
        );
        Request::post(uri)
            .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_classifier_state() {
        let app = app().await;
        let (status, body) = send_json(&app, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["classifier"]["state"], "uninitialized");

        send_json(&app, post_json("/api/analyze-text", json!({"text": "Great movie!"}))).await;
        let (_, body) = send_json(&app, get("/api/health")).await;
        assert_eq!(body["classifier"]["state"], "fallback_only");
    }

    #[tokio::test]
    async fn test_analyze_text() {
        let app = app().await;
        let (status, body) = send_json(&app, post_json("/api/analyze-text", json!({"text": "Great movie!"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["label"], "POSITIVE");
        assert!((body["score"].as_f64().unwrap() - 0.85).abs() < 1e-6);

        let (status, body) = send_json(&app, post_json("/api/analyze-text", json!({"text": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Missing 'text'");
    }

    #[tokio::test]
    async fn test_sample_analyze_summary_export() {
        let app = app().await;

        let (status, body) = send_json(&app, post_empty("/api/reviews/tt1160419/use-sample")).await;
        assert_eq!(status, StatusCode::OK);
        let count = body["count"].as_u64().unwrap() as usize;
        assert_eq!(count, reviews::builtin_sample().len());
        assert_eq!(body["note"], "used sample");

        let (status, body) = send_json(&app, post_empty("/api/analyze/tt1160419")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"].as_u64().unwrap() as usize, count);

        let (status, body) = send_json(&app, get("/api/summary/tt1160419")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"].as_u64().unwrap() as usize, count);
        let parts = body["positives"].as_u64().unwrap() + body["negatives"].as_u64().unwrap() + body["neutral"].as_u64().unwrap();
        assert_eq!(parts as usize, count);
        assert!(body["top_positive_quotes"].as_array().unwrap().len() <= 5);

        let (status, body) = send_json(&app, get("/api/analysis/tt1160419")).await;
        assert_eq!(status, StatusCode::OK);
        let rows: Vec<AnalysisRow> = serde_json::from_value(body["rows"].clone()).unwrap();
        let sample = reviews::builtin_sample();
        for (row, review) in rows.iter().zip(&sample) {
            assert_eq!(row.text, review.text);
            assert_eq!(row.source, review.source);
            assert_eq!(*row, AnalysisRow::new(review.clone(), crate::ml::classify(&review.text)));
        }

        let resp = router(app.state.clone()).oneshot(get("/api/export/tt1160419.csv")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "text/csv");
        assert_eq!(
            resp.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"tt1160419_analysis.csv\""
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let csv = String::from_utf8(body.to_vec()).unwrap();
        assert!(csv.starts_with("text,source,timestamp,label,score\n"));
        assert_eq!(csv.lines().count(), count + 1);
    }

    #[tokio::test]
    async fn test_missing_data_is_404() {
        let app = app().await;
        for uri in ["/api/summary/tt404", "/api/analysis/tt404", "/api/export/tt404.csv"] {
            let (status, _) = send(&app, get(uri)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        }
        let (status, body) = send_json(&app, post_empty("/api/analyze/tt404")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "No reviews uploaded/imported for this movie");
    }

    #[tokio::test]
    async fn test_reanalysis_replaces_rows() {
        let app = app().await;
        send(&app, post_json("/api/reviews/tt9/add", json!({"text": "Awful and dull"}))).await;
        send(&app, post_empty("/api/analyze/tt9")).await;
        let (_, first) = send_json(&app, get("/api/summary/tt9")).await;
        assert_eq!(first["negatives"], 1);

        send(&app, post_json("/api/reviews/tt9/add", json!({"text": "Loved it"}))).await;
        send(&app, post_empty("/api/analyze/tt9")).await;
        let (_, second) = send_json(&app, get("/api/summary/tt9")).await;
        assert_eq!(second["total"], 2);
        assert_eq!(second["positives"], 1);
        assert_eq!(second["positivity_ratio"], 0.5);
    }

    #[tokio::test]
    async fn test_add_review() {
        let app = app().await;
        let (status, body) = send_json(&app, post_json("/api/reviews/tt5/add", json!({"text": "  Nice one  "}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 1);
        assert_eq!(body["added"]["text"], "Nice one");
        assert_eq!(body["added"]["source"], "user");
        assert!(body["added"]["timestamp"].as_str().unwrap().ends_with('Z'));

        let (_, body) = send_json(&app, post_json("/api/reviews/tt5/add", json!({"text": "Second", "source": "me"}))).await;
        assert_eq!(body["count"], 2);

        let (_, body) = send_json(&app, get("/api/reviews/tt5")).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["reviews"][1]["source"], "me");

        let (status, _) = send(&app, post_json("/api/reviews/tt5/add", json!({"source": "x"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generate_reviews() {
        let app = app().await;
        let (status, body) = send_json(&app, post_empty("/api/reviews/tt7/generate?count=10")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 10);

        let (_, body) = send_json(&app, post_empty("/api/reviews/tt7/generate")).await;
        assert_eq!(body["count"], 40);
        assert_eq!(body["note"], "mock reviews generated");
    }

    #[tokio::test]
    async fn test_upload_csv_and_json() {
        let app = app().await;
        let csv = "text,source,timestamp\nGreat film,imdb,2024-01-01T00:00:00Z\n,empty,\nBoring,imdb,\n";
        let (status, body) = send_json(&app, multipart("/api/reviews/tt3/upload", "reviews.csv", csv)).await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        assert_eq!(body["count"], 2);

        let json_body = r#"[{"text": "Loved it"}, {"text": "Hated it", "source": "x"}, {"text": ""}]"#;
        let (status, body) = send_json(&app, multipart("/api/reviews/tt3/upload", "reviews.json", json_body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);

        let (_, body) = send_json(&app, get("/api/reviews/tt3")).await;
        assert_eq!(body["reviews"][0]["text"], "Loved it");
    }

    #[tokio::test]
    async fn test_upload_rejections() {
        let app = app().await;
        let (status, body) = send_json(&app, post_empty("/api/reviews/tt3/upload")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Please upload a CSV or JSON file, or use /use-sample");

        let (status, body) = send_json(&app, multipart("/api/reviews/tt3/upload", "r.json", r#"{"text": "x"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().unwrap().starts_with("Failed to parse file"));

        let (status, body) = send_json(&app, multipart("/api/reviews/tt3/upload", "r.json", r#"[{"text": ""}]"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "No valid reviews found");
    }

    #[tokio::test]
    async fn test_movie_lookup_without_key() {
        let app = app().await;
        let (status, body) = send_json(&app, get("/api/movies/tt1160419")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap().contains("OMDB_API_KEY"));

        let cached = json!({"Title": "Dune", "Response": "True"});
        app.state.store.save_movie_meta("tt1160419", &cached).await.unwrap();
        let (status, body) = send_json(&app, get("/api/movies/tt1160419")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, cached);

        let (status, _) = send(&app, get("/api/movies/search?query=dune")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_tmdb_import_without_key() {
        let app = app().await;
        let (status, body) = send_json(&app, post_empty("/api/reviews/tt1160419/import/tmdb")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["detail"].as_str().unwrap().contains("TMDB_API_KEY"));
    }

    #[tokio::test]
    async fn test_invalid_movie_id() {
        let app = app().await;
        let (status, _) = send(&app, get("/api/reviews/..%2Fetc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejected_input_uses_detail_body() {
        let app = app().await;

        let malformed = Request::post("/api/analyze-text")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send_json(&app, malformed).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());

        let no_content_type = Request::post("/api/reviews/tt5/add")
            .body(Body::from(r#"{"text": "hi"}"#))
            .unwrap();
        let (status, body) = send_json(&app, no_content_type).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());

        let (status, body) = send_json(&app, post_empty("/api/reviews/tt5/generate?count=lots")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());

        let (status, body) = send_json(&app, get("/api/movies/search")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].is_string());
    }

    #[tokio::test]
    async fn test_index_fallback_page() {
        let app = app().await;
        let (status, body) = send(&app, get("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("Movie Sentiment Analyzer"));
    }

    #[tokio::test]
    async fn test_analysis_labels_serialize_uppercase() {
        let app = app().await;
        send(&app, post_json("/api/reviews/tt8/add", json!({"text": "This was boring and terrible."}))).await;
        send(&app, post_empty("/api/analyze/tt8")).await;
        let (_, body) = send_json(&app, get("/api/analysis/tt8")).await;
        let row: AnalysisRow = serde_json::from_value(body["rows"][0].clone()).unwrap();
        assert_eq!(row.label, Label::Negative);
        assert_eq!(body["rows"][0]["label"], "NEGATIVE");
    }
}
