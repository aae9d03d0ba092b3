use crate::domain::{
    Client, DataRepository, Product, RecommendationItem, RecommendationResult,
};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// Production [`DataRepository`] over Postgres.
pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DataRepository for PgRepository {
    async fn get_client(&self, id: &str) -> anyhow::Result<Option<Client>> {
        let row = sqlx::query_as::<_, (String, String, String, f64)>(
            "SELECT id, name, risk_profile, total_wealth FROM clients WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("select client failed")?;

        row.map(|(id, name, risk_profile, total_wealth)| {
            Ok(Client {
                id,
                name,
                risk_profile: risk_profile.parse()?,
                total_wealth,
            })
        })
        .transpose()
    }

    async fn list_active_products(&self) -> anyhow::Result<Vec<Product>> {
        let rows = sqlx::query_as::<_, (String, String, String, f64, f64)>(
            "SELECT id, name, risk, yield_12m, minimum_investment \
             FROM products WHERE active",
        )
        .fetch_all(&self.pool)
        .await
        .context("select active products failed")?;

        rows.into_iter()
            .map(|(id, name, risk, yield_12m, minimum_investment)| {
                Ok(Product {
                    id,
                    name,
                    risk: risk.parse()?,
                    yield_12m,
                    minimum_investment,
                })
            })
            .collect()
    }

    async fn has_ownership(&self, client_id: &str, product_id: &str) -> anyhow::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM client_holdings \
             WHERE client_id = $1 AND product_id = $2)",
        )
        .bind(client_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .context("ownership probe failed")?;
        Ok(exists)
    }

    async fn has_recent_interaction(
        &self,
        client_id: &str,
        product_id: &str,
    ) -> anyhow::Result<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM client_interactions \
             WHERE client_id = $1 AND product_id = $2)",
        )
        .bind(client_id)
        .bind(product_id)
        .fetch_one(&self.pool)
        .await
        .context("interaction probe failed")?;
        Ok(exists)
    }

    async fn save_recommendation(
        &self,
        client_id: &str,
        items: &[RecommendationItem],
    ) -> anyhow::Result<Uuid> {
        let items_json =
            serde_json::to_value(items).context("serialize recommendation items failed")?;

        let (id,): (Uuid,) = sqlx::query_as(
            "INSERT INTO recommendations (client_id, items) VALUES ($1, $2) RETURNING id",
        )
        .bind(client_id)
        .bind(items_json)
        .fetch_one(&self.pool)
        .await
        .context("insert recommendation failed")?;
        Ok(id)
    }

    async fn latest_recommendation(
        &self,
        client_id: &str,
    ) -> anyhow::Result<Option<RecommendationResult>> {
        let row = sqlx::query_as::<_, (Uuid, String, serde_json::Value)>(
            "SELECT id, client_id, items FROM recommendations \
             WHERE client_id = $1 \
             ORDER BY created_at DESC \
             LIMIT 1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .context("select latest recommendation failed")?;

        let Some((id, client_id, items)) = row else {
            return Ok(None);
        };
        let items: Vec<RecommendationItem> =
            serde_json::from_value(items).context("decode stored recommendation items failed")?;

        Ok(Some(RecommendationResult {
            id,
            client_id,
            items,
        }))
    }

    async fn list_all_clients(&self) -> anyhow::Result<Vec<Client>> {
        let rows = sqlx::query_as::<_, (String, String, String, f64)>(
            "SELECT id, name, risk_profile, total_wealth FROM clients ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("select clients failed")?;

        rows.into_iter()
            .map(|(id, name, risk_profile, total_wealth)| {
                Ok(Client {
                    id,
                    name,
                    risk_profile: risk_profile.parse()?,
                    total_wealth,
                })
            })
            .collect()
    }
}
