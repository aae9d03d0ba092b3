use crate::bus::{EventBus, Handler, Payload};
use crate::domain::DataRepository;
use crate::scoring::RecommendationEngine;
use anyhow::Context;
use std::sync::Arc;

/// Topic the worker listens on; publishers must use the same name.
pub const GENERATE_RECOMMENDATION_TOPIC: &str = "generate-recommendation";

/// Publishes scoring requests onto the bus, decoupled from their execution.
pub struct RecommendationDispatcher {
    repo: Arc<dyn DataRepository>,
    bus: Arc<dyn EventBus>,
}

impl RecommendationDispatcher {
    pub fn new(repo: Arc<dyn DataRepository>, bus: Arc<dyn EventBus>) -> Self {
        Self { repo, bus }
    }

    /// Publishes one scoring request. The client's existence is checked only
    /// when the worker eventually processes the message.
    pub async fn request_single(&self, client_id: &str) {
        tracing::info!(client_id, "requesting recommendation generation");
        self.bus
            .publish(
                GENERATE_RECOMMENDATION_TOPIC,
                serde_json::Value::String(client_id.to_string()),
            )
            .await;
    }

    /// Fans one scoring request out per client on the roster.
    ///
    /// A roster read failure fails the whole trigger before anything is
    /// published. After that, per-client publish failures follow the bus's
    /// fire-and-forget contract and are not surfaced here.
    pub async fn request_bulk(&self) -> anyhow::Result<usize> {
        let clients = self
            .repo
            .list_all_clients()
            .await
            .context("failed to list clients for bulk generation")?;

        tracing::info!(total_clients = clients.len(), "starting bulk recommendation trigger");

        for client in &clients {
            self.bus
                .publish(
                    GENERATE_RECOMMENDATION_TOPIC,
                    serde_json::Value::String(client.id.clone()),
                )
                .await;
        }
        Ok(clients.len())
    }
}

/// Consumes scoring requests from the bus and runs the engine per message.
pub struct RecommendationWorker {
    engine: Arc<RecommendationEngine>,
    bus: Arc<dyn EventBus>,
}

impl RecommendationWorker {
    pub fn new(engine: Arc<RecommendationEngine>, bus: Arc<dyn EventBus>) -> Self {
        Self { engine, bus }
    }

    /// Registers the processing handler; consumption runs in the background.
    pub async fn start(&self) {
        tracing::info!(
            topic = GENERATE_RECOMMENDATION_TOPIC,
            "starting recommendation worker"
        );

        let engine = Arc::clone(&self.engine);
        let handler: Handler = crate::bus::handler(move |payload| {
            let engine = Arc::clone(&engine);
            async move { process_message(engine, payload).await }
        });

        self.bus
            .subscribe(GENERATE_RECOMMENDATION_TOPIC, handler)
            .await;

        tracing::info!("recommendation worker started");
    }
}

async fn process_message(engine: Arc<RecommendationEngine>, payload: Payload) {
    tracing::info!("message received on recommendation worker");

    let Some(client_id) = payload.as_text() else {
        tracing::error!(payload = ?payload, "worker expected a string client id");
        return;
    };
    if client_id.is_empty() {
        tracing::warn!("received empty client id");
        return;
    }

    match engine.score(client_id).await {
        Ok(result) => {
            tracing::info!(
                client_id,
                recommendation_id = %result.id,
                recommended = result.items.len(),
                "recommendation processed via worker"
            );
        }
        // The payload decoded, so the bus acks this message regardless: a
        // failed run for a valid client is never retried.
        Err(err) => {
            tracing::error!(client_id, error = %err, "recommendation run failed in worker");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryEventBus;
    use crate::domain::{
        Client, Product, ProductRisk, RecommendationItem, RecommendationResult, RiskProfile,
    };
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct RosterRepository {
        clients: Vec<Client>,
        products: Vec<Product>,
        saved: Mutex<Vec<String>>,
        fail_roster: bool,
    }

    #[async_trait]
    impl DataRepository for RosterRepository {
        async fn get_client(&self, id: &str) -> anyhow::Result<Option<Client>> {
            Ok(self.clients.iter().find(|c| c.id == id).cloned())
        }

        async fn list_active_products(&self) -> anyhow::Result<Vec<Product>> {
            Ok(self.products.clone())
        }

        async fn has_ownership(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn has_recent_interaction(&self, _: &str, _: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn save_recommendation(
            &self,
            client_id: &str,
            _items: &[RecommendationItem],
        ) -> anyhow::Result<Uuid> {
            self.saved.lock().await.push(client_id.to_string());
            Ok(Uuid::new_v4())
        }

        async fn latest_recommendation(
            &self,
            _client_id: &str,
        ) -> anyhow::Result<Option<RecommendationResult>> {
            Ok(None)
        }

        async fn list_all_clients(&self) -> anyhow::Result<Vec<Client>> {
            if self.fail_roster {
                anyhow::bail!("clients table unavailable");
            }
            Ok(self.clients.clone())
        }
    }

    /// Bus double that records publishes without delivering anything.
    #[derive(Default)]
    struct RecordingBus {
        published: Mutex<Vec<(String, serde_json::Value)>>,
    }

    #[async_trait]
    impl EventBus for RecordingBus {
        async fn publish(&self, topic: &str, payload: serde_json::Value) {
            self.published
                .lock()
                .await
                .push((topic.to_string(), payload));
        }

        async fn subscribe(&self, _topic: &str, _handler: Handler) {}
    }

    fn client(id: &str) -> Client {
        Client {
            id: id.to_string(),
            name: format!("Client {id}"),
            risk_profile: RiskProfile::Conservative,
            total_wealth: 100_000.0,
        }
    }

    fn product(id: &str) -> Product {
        Product {
            id: id.to_string(),
            name: format!("Fund {id}"),
            risk: ProductRisk::Low,
            yield_12m: 12.0,
            minimum_investment: 1_000.0,
        }
    }

    #[tokio::test]
    async fn bulk_publishes_one_message_per_client_on_one_topic() {
        let repo = Arc::new(RosterRepository {
            clients: vec![client("C1"), client("C2"), client("C3")],
            ..Default::default()
        });
        let bus = Arc::new(RecordingBus::default());
        let dispatcher =
            RecommendationDispatcher::new(repo, Arc::clone(&bus) as Arc<dyn EventBus>);

        let published = dispatcher.request_bulk().await.unwrap();
        assert_eq!(published, 3);

        let messages = bus.published.lock().await;
        assert_eq!(messages.len(), 3);
        let topics: HashMap<&str, usize> =
            messages
                .iter()
                .fold(HashMap::new(), |mut acc, (topic, _)| {
                    *acc.entry(topic.as_str()).or_default() += 1;
                    acc
                });
        assert_eq!(topics.len(), 1);
        assert_eq!(topics[GENERATE_RECOMMENDATION_TOPIC], 3);

        let ids: Vec<&str> = messages
            .iter()
            .filter_map(|(_, payload)| payload.as_str())
            .collect();
        assert_eq!(ids, vec!["C1", "C2", "C3"]);
    }

    #[tokio::test]
    async fn bulk_fails_atomically_when_roster_read_fails() {
        let repo = Arc::new(RosterRepository {
            fail_roster: true,
            ..Default::default()
        });
        let bus = Arc::new(RecordingBus::default());
        let dispatcher =
            RecommendationDispatcher::new(repo, Arc::clone(&bus) as Arc<dyn EventBus>);

        assert!(dispatcher.request_bulk().await.is_err());
        assert!(bus.published.lock().await.is_empty());
    }

    #[tokio::test]
    async fn single_request_publishes_without_existence_check() {
        let repo = Arc::new(RosterRepository::default());
        let bus = Arc::new(RecordingBus::default());
        let dispatcher =
            RecommendationDispatcher::new(repo, Arc::clone(&bus) as Arc<dyn EventBus>);

        dispatcher.request_single("ghost").await;

        let messages = bus.published.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1.as_str(), Some("ghost"));
    }

    async fn worker_fixture(
        repo: Arc<RosterRepository>,
    ) -> (Arc<InMemoryEventBus>, RecommendationWorker) {
        let bus = Arc::new(InMemoryEventBus::new());
        let engine = Arc::new(RecommendationEngine::new(
            Arc::clone(&repo) as Arc<dyn DataRepository>
        ));
        let worker =
            RecommendationWorker::new(engine, Arc::clone(&bus) as Arc<dyn EventBus>);
        worker.start().await;
        (bus, worker)
    }

    #[tokio::test]
    async fn worker_scores_and_persists_for_a_valid_message() {
        let repo = Arc::new(RosterRepository {
            clients: vec![client("C1")],
            products: vec![product("P1")],
            ..Default::default()
        });
        let (bus, _worker) = worker_fixture(Arc::clone(&repo)).await;

        bus.publish(
            GENERATE_RECOMMENDATION_TOPIC,
            serde_json::Value::String("C1".to_string()),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(*repo.saved.lock().await, vec!["C1".to_string()]);
    }

    #[tokio::test]
    async fn worker_drops_empty_client_id() {
        let repo = Arc::new(RosterRepository {
            clients: vec![client("C1")],
            products: vec![product("P1")],
            ..Default::default()
        });
        let (bus, _worker) = worker_fixture(Arc::clone(&repo)).await;

        bus.publish(
            GENERATE_RECOMMENDATION_TOPIC,
            serde_json::Value::String(String::new()),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(repo.saved.lock().await.is_empty());
        assert_eq!(bus.stats().acked(), 1);
    }

    #[tokio::test]
    async fn worker_drops_structured_payloads_but_message_is_acked() {
        let repo = Arc::new(RosterRepository {
            clients: vec![client("C1")],
            products: vec![product("P1")],
            ..Default::default()
        });
        let (bus, _worker) = worker_fixture(Arc::clone(&repo)).await;

        bus.publish(
            GENERATE_RECOMMENDATION_TOPIC,
            serde_json::json!({ "client_id": "C1" }),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(repo.saved.lock().await.is_empty());
        assert_eq!(bus.stats().acked(), 1);
        assert_eq!(bus.stats().nacked(), 0);
    }

    #[tokio::test]
    async fn worker_side_scoring_failure_is_terminal_for_the_message() {
        // Unknown client: the run fails inside the handler, the message is
        // still acked, nothing is persisted and nothing is redelivered.
        let repo = Arc::new(RosterRepository::default());
        let (bus, _worker) = worker_fixture(Arc::clone(&repo)).await;

        bus.publish(
            GENERATE_RECOMMENDATION_TOPIC,
            serde_json::Value::String("missing".to_string()),
        )
        .await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert!(repo.saved.lock().await.is_empty());
        assert_eq!(bus.stats().acked(), 1);
        assert_eq!(bus.stats().nacked(), 0);
    }
}
