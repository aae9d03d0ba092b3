use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use advisor_core::bus::{EventBus, GcpEventBus};
use advisor_core::domain::DataRepository;
use advisor_core::orchestrator::{RecommendationDispatcher, RecommendationWorker};
use advisor_core::scoring::RecommendationEngine;
use advisor_core::storage::PgRepository;

#[derive(Debug, Parser)]
#[command(name = "advisor_worker")]
struct Args {
    /// Publish a scoring request for every client after startup.
    #[arg(long)]
    bulk: bool,
}

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

    let args = Args::parse();

    let db_url = settings.require_database_url()?;
    let pool = advisor_core::storage::connect(db_url).await?;
    advisor_core::storage::migrate(&pool).await?;

    let repo: Arc<dyn DataRepository> = Arc::new(PgRepository::new(pool));

    let project_id = settings.require_gcp_project_id()?;
    let bus = Arc::new(GcpEventBus::connect(project_id, settings.environment.clone()).await?);

    let mut engine = RecommendationEngine::new(Arc::clone(&repo));
    if let Some(max) = settings.scoring_max_concurrency {
        engine = engine.with_max_concurrency(max);
    }
    let engine = Arc::new(engine);

    let worker = RecommendationWorker::new(
        Arc::clone(&engine),
        Arc::clone(&bus) as Arc<dyn EventBus>,
    );
    worker.start().await;

    if args.bulk {
        let dispatcher =
            RecommendationDispatcher::new(Arc::clone(&repo), Arc::clone(&bus) as Arc<dyn EventBus>);
        match dispatcher.request_bulk().await {
            Ok(published) => tracing::info!(published, "bulk recommendation trigger published"),
            Err(err) => {
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "bulk recommendation trigger failed");
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down recommendation worker");
    bus.close().await;

    Ok(())
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
