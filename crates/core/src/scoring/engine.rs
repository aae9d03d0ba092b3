use crate::domain::{
    Client, DataRepository, Fact, Product, RecommendationError, RecommendationItem,
    RecommendationResult,
};
use crate::scoring::policy::ScoringPolicy;
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};

/// Upper bound on concurrent per-product evaluations. Each evaluation holds
/// up to two repository lookups, so this must stay below the connection pool
/// cap even for large product catalogs.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// Scores every active product for a client, ranks the survivors and
/// persists the run as an audit record.
pub struct RecommendationEngine {
    repo: Arc<dyn DataRepository>,
    policy: ScoringPolicy,
    max_concurrency: usize,
}

impl RecommendationEngine {
    pub fn new(repo: Arc<dyn DataRepository>) -> Self {
        Self {
            repo,
            policy: ScoringPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }

    pub fn with_policy(mut self, policy: ScoringPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Runs one scoring pass for `client_id`.
    ///
    /// Every invocation re-reads client and product state; there is no reuse
    /// of previous runs. Products whose final score is not strictly positive
    /// are dropped. The persisted audit id becomes the result id, so a failed
    /// audit write fails the whole run even though scoring succeeded.
    pub async fn score(
        &self,
        client_id: &str,
    ) -> Result<RecommendationResult, RecommendationError> {
        tracing::info!(client_id, "starting recommendation run");

        let client = self
            .repo
            .get_client(client_id)
            .await
            .map_err(RecommendationError::DataUnavailable)?
            .ok_or_else(|| RecommendationError::ClientNotFound(client_id.to_string()))?;

        let products = self
            .repo
            .list_active_products()
            .await
            .map_err(RecommendationError::DataUnavailable)?;
        let analyzed = products.len();

        // Buffered to the product count so no evaluation blocks on fan-in;
        // the channel closing after all senders drop is the join point.
        let (tx, mut rx) = mpsc::channel::<RecommendationItem>(analyzed.max(1));
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let client = Arc::new(client);

        for product in products {
            let tx = tx.clone();
            let repo = Arc::clone(&self.repo);
            let semaphore = Arc::clone(&semaphore);
            let client = Arc::clone(&client);
            let policy = self.policy.clone();

            tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let item = evaluate_product(&*repo, &policy, &client, product).await;
                if let Some(item) = item {
                    let _ = tx.send(item).await;
                }
            });
        }
        drop(tx);

        let mut items = Vec::new();
        while let Some(item) = rx.recv().await {
            items.push(item);
        }

        // Descending score; equal scores break ties on product id so the
        // ranking is deterministic (the legacy behavior was order-unstable).
        items.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.product.id.cmp(&b.product.id))
        });

        tracing::info!(
            client_id,
            recommended = items.len(),
            analyzed,
            "recommendation run finished"
        );

        let id = self
            .repo
            .save_recommendation(&client.id, &items)
            .await
            .map_err(RecommendationError::PersistenceFailed)?;

        Ok(RecommendationResult {
            id,
            client_id: client.id.clone(),
            items,
        })
    }

    /// Most recent persisted result for the client, if any.
    pub async fn latest(
        &self,
        client_id: &str,
    ) -> anyhow::Result<Option<RecommendationResult>> {
        self.repo.latest_recommendation(client_id).await
    }
}

/// Scores one product. Auxiliary fact lookups that fail degrade to
/// [`Fact::Unknown`] with a warning instead of aborting the run.
async fn evaluate_product(
    repo: &dyn DataRepository,
    policy: &ScoringPolicy,
    client: &Client,
    product: Product,
) -> Option<RecommendationItem> {
    let owned = Fact::from_lookup(repo.has_ownership(&client.id, &product.id).await);
    if owned == Fact::Unknown {
        tracing::warn!(
            client_id = %client.id,
            product_id = %product.id,
            "ownership lookup failed; treating as absent"
        );
    }

    let interacted = Fact::from_lookup(repo.has_recent_interaction(&client.id, &product.id).await);
    if interacted == Fact::Unknown {
        tracing::warn!(
            client_id = %client.id,
            product_id = %product.id,
            "interaction lookup failed; treating as absent"
        );
    }

    let (score, reason) = policy.score_product(client, &product, owned, interacted);
    if score > 0.0 {
        Some(RecommendationItem {
            product,
            score,
            reason,
        })
    } else {
        None
    }
}
