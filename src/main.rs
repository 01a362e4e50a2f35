use movie_sentiment::{
    api,
    classifier::{self, SentimentClassifier},
    config::Settings,
    ml,
    model::DefaultLoader,
    omdb::OmdbClient,
    reviews,
    store::Store,
    summary,
    tmdb::TmdbClient,
};

use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health,
        api::movie_search,
        api::movie_get,
        api::get_reviews,
        api::upload_reviews,
        api::use_sample,
        api::generate_reviews,
        api::add_review,
        api::import_tmdb,
        api::analyze,
        api::get_summary,
        api::get_analysis,
        api::export_csv,
        api::analyze_text
    ),
    components(
        schemas(
            api::HealthResponse,
            api::CountResponse,
            api::UploadForm,
            api::AddReviewRequest,
            api::AddReviewResponse,
            api::ReviewsResponse,
            api::AnalysisResponse,
            api::AnalyzeTextRequest,
            reviews::Review,
            summary::AnalysisRow,
            summary::Summary,
            ml::Label,
            ml::Prediction,
            classifier::ClassifierStatus,
            classifier::ClassifierState
        )
    ),
    tags(
        (name = "service", description = "Service status"),
        (name = "movies", description = "OMDb movie lookup"),
        (name = "reviews", description = "Review collection"),
        (name = "analysis", description = "Sentiment analysis and export")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();

    let store = Store::new(&settings.data_dir);
    store.init().await?;

    let classifier = SentimentClassifier::with_parts(
        settings.classifier.clone(),
        settings.memory_probe(),
        Box::new(DefaultLoader),
    );
    info!(
        lightweight = settings.classifier.lightweight_mode,
        model = %settings.classifier.model_name,
        "sentiment classifier configured, model loads on first request"
    );

    let state = Arc::new(api::AppState {
        store,
        classifier: Arc::new(classifier),
        omdb: OmdbClient::new(settings.omdb_api_key.clone()),
        tmdb: TmdbClient::new(settings.tmdb_api_key.clone()),
        frontend_dir: settings.frontend_dir.clone(),
    });

    let app = api::router(state)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    info!("Server running on http://{}", settings.bind_addr);
    info!("Swagger UI at http://{}/swagger-ui", settings.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
