pub mod bus;
pub mod domain;
pub mod orchestrator;
pub mod scoring;
pub mod storage;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub gcp_project_id: Option<String>,
        /// Environment tag appended to bus topic names ("generate-recommendation-staging").
        pub environment: Option<String>,
        pub sentry_dsn: Option<String>,
        pub scoring_max_concurrency: Option<usize>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                gcp_project_id: std::env::var("GCP_PROJECT_ID").ok(),
                environment: std::env::var("ENVIRONMENT").ok().filter(|s| !s.is_empty()),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                scoring_max_concurrency: std::env::var("SCORING_MAX_CONCURRENCY")
                    .ok()
                    .and_then(|v| v.parse().ok()),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_gcp_project_id(&self) -> anyhow::Result<&str> {
            self.gcp_project_id
                .as_deref()
                .context("GCP_PROJECT_ID is required")
        }
    }
}
