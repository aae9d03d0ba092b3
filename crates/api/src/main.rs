use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use advisor_core::bus::{EventBus, GcpEventBus};
use advisor_core::domain::{DataRepository, RecommendationError, RecommendationResult};
use advisor_core::orchestrator::RecommendationDispatcher;
use advisor_core::scoring::RecommendationEngine;
use advisor_core::storage::PgRepository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = advisor_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let db_url = settings.require_database_url()?;
    let pool = advisor_core::storage::connect(db_url).await?;
    advisor_core::storage::migrate(&pool).await?;

    let repo: Arc<dyn DataRepository> = Arc::new(PgRepository::new(pool));

    let project_id = settings.require_gcp_project_id()?;
    let bus: Arc<dyn EventBus> = Arc::new(
        GcpEventBus::connect(project_id, settings.environment.clone()).await?,
    );

    let mut engine = RecommendationEngine::new(Arc::clone(&repo));
    if let Some(max) = settings.scoring_max_concurrency {
        engine = engine.with_max_concurrency(max);
    }

    let state = AppState {
        engine: Arc::new(engine),
        dispatcher: Arc::new(RecommendationDispatcher::new(repo, bus)),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/recommendations/:client_id",
            get(get_latest).post(generate_sync),
        )
        .route("/recommendations/:client_id/async", post(generate_async))
        .route("/recommendations/bulk", post(generate_bulk))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    engine: Arc<RecommendationEngine>,
    dispatcher: Arc<RecommendationDispatcher>,
}

/// Synchronous scoring: the caller blocks for the ranked result.
async fn generate_sync(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<RecommendationResult>, StatusCode> {
    tracing::info!(%client_id, "generating recommendations");

    let result = state.engine.score(&client_id).await.map_err(|err| {
        tracing::error!(%client_id, error = %err, "failed to generate recommendations");
        match err {
            RecommendationError::ClientNotFound(_) => StatusCode::NOT_FOUND,
            RecommendationError::DataUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            RecommendationError::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    })?;

    tracing::info!(
        %client_id,
        recommendation_id = %result.id,
        recommended = result.items.len(),
        "recommendations generated"
    );
    Ok(Json(result))
}

/// Most recent persisted result; absent means failed-or-pending.
async fn get_latest(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<RecommendationResult>, StatusCode> {
    let result = state
        .engine
        .latest(&client_id)
        .await
        .map_err(|err| {
            sentry_anyhow::capture_anyhow(&err);
            tracing::error!(%client_id, error = %err, "failed to fetch recommendations");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(result))
}

/// Asynchronous trigger for one client; scoring happens in the worker.
async fn generate_async(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> (StatusCode, Json<serde_json::Value>) {
    state.dispatcher.request_single(&client_id).await;
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "request accepted",
            "client_id": client_id,
        })),
    )
}

/// Asynchronous trigger for every client on the roster.
async fn generate_bulk(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    let published = state.dispatcher.request_bulk().await.map_err(|err| {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "failed to start bulk generation");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "bulk generation started; recommendations are produced in background",
            "clients": published,
        })),
    ))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &advisor_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
