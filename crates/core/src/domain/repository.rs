use crate::domain::entities::{Client, Product, RecommendationItem, RecommendationResult};
use async_trait::async_trait;
use uuid::Uuid;

/// Read/write capability the scoring core consumes. One production
/// implementation lives in [`crate::storage::postgres`]; tests supply
/// in-memory doubles.
#[async_trait]
pub trait DataRepository: Send + Sync {
    /// Resolves a client by id. `Ok(None)` means the client does not exist;
    /// `Err` means the lookup itself failed.
    async fn get_client(&self, id: &str) -> anyhow::Result<Option<Client>>;

    async fn list_active_products(&self) -> anyhow::Result<Vec<Product>>;

    /// Whether the client already holds this product.
    async fn has_ownership(&self, client_id: &str, product_id: &str) -> anyhow::Result<bool>;

    /// Whether the client recently interacted with this product.
    async fn has_recent_interaction(
        &self,
        client_id: &str,
        product_id: &str,
    ) -> anyhow::Result<bool>;

    /// Persists the ranked items as a new audit record and returns the
    /// generated recommendation id. Never updates in place.
    async fn save_recommendation(
        &self,
        client_id: &str,
        items: &[RecommendationItem],
    ) -> anyhow::Result<Uuid>;

    /// Most recently created recommendation for the client, if any.
    async fn latest_recommendation(
        &self,
        client_id: &str,
    ) -> anyhow::Result<Option<RecommendationResult>>;

    async fn list_all_clients(&self) -> anyhow::Result<Vec<Client>>;
}
