/// Caller-visible failure classes for a scoring run.
///
/// Required-data failures (client, product list) abort the run; auxiliary
/// fact lookups never surface here (see [`crate::domain::Fact`]).
#[derive(Debug, thiserror::Error)]
pub enum RecommendationError {
    #[error("client not found: {0}")]
    ClientNotFound(String),

    #[error("required data unavailable")]
    DataUnavailable(#[source] anyhow::Error),

    #[error("failed to persist recommendation audit record")]
    PersistenceFailed(#[source] anyhow::Error),
}
