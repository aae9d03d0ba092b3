use super::{dispatch, qualified_topic, EventBus, Handler, Payload};
use anyhow::Context;
use async_trait::async_trait;
use google_cloud_googleapis::pubsub::v1::PubsubMessage;
use google_cloud_pubsub::client::{Client, ClientConfig};
use google_cloud_pubsub::subscription::SubscriptionConfig;
use google_cloud_pubsub::topic::Topic;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// How long Pub/Sub waits for an ack before it may redeliver a message.
const ACK_DEADLINE_SECONDS: i32 = 60;

/// Production [`EventBus`] backed by Google Cloud Pub/Sub.
///
/// Topics and subscriptions are auto-provisioned on first use. Delivery is
/// at-least-once: a message is acked after all registered handlers for its
/// topic have been dispatched, and nacked when its payload does not decode.
pub struct GcpEventBus {
    client: Client,
    environment: Option<String>,
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
    active: Arc<RwLock<HashSet<String>>>,
    cancel: CancellationToken,
}

impl GcpEventBus {
    pub async fn connect(project_id: &str, environment: Option<String>) -> anyhow::Result<Self> {
        let mut config = ClientConfig::default()
            .with_auth()
            .await
            .context("failed to resolve Pub/Sub credentials")?;
        config.project_id = Some(project_id.to_string());
        let client = Client::new(config)
            .await
            .context("failed to create Pub/Sub client")?;

        tracing::info!(project_id, environment = ?environment, "GCP Pub/Sub initialized");

        Ok(Self {
            client,
            environment,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            active: Arc::new(RwLock::new(HashSet::new())),
            cancel: CancellationToken::new(),
        })
    }

    /// Stops all consumption loops. In-flight handler invocations are not
    /// drained.
    pub async fn close(&self) {
        self.cancel.cancel();
    }

    fn topic_name(&self, base: &str) -> String {
        qualified_topic(base, self.environment.as_deref())
    }

    async fn ensure_topic(&self, name: &str) -> anyhow::Result<Topic> {
        let topic = self.client.topic(name);
        if !topic
            .exists(None)
            .await
            .context("failed to check topic existence")?
        {
            topic
                .create(None, None)
                .await
                .context("failed to create topic")?;
            tracing::info!(topic = name, "topic created");
        }
        Ok(topic)
    }

    async fn try_publish(&self, name: &str, data: Vec<u8>) -> anyhow::Result<()> {
        let topic = self.ensure_topic(name).await?;
        let mut publisher = topic.new_publisher(None);
        let awaiter = publisher
            .publish(PubsubMessage {
                data: data.into(),
                ..Default::default()
            })
            .await;

        // Send confirmation is observed asynchronously and only logged; the
        // publisher moves into the task so the pending send survives it.
        let topic_name = name.to_string();
        tokio::spawn(async move {
            match awaiter.get().await {
                Ok(message_id) => {
                    tracing::info!(topic = %topic_name, %message_id, "event published");
                }
                Err(status) => {
                    tracing::error!(topic = %topic_name, error = %status, "failed to publish event");
                }
            }
            publisher.shutdown().await;
        });
        Ok(())
    }

    async fn try_subscribe(&self, name: &str) -> anyhow::Result<()> {
        let subscription_name = format!("{name}-sub");
        let subscription = self.client.subscription(&subscription_name);
        if !subscription
            .exists(None)
            .await
            .context("failed to check subscription existence")?
        {
            let topic = self.ensure_topic(name).await?;
            self.client
                .create_subscription(
                    &subscription_name,
                    topic.fully_qualified_name(),
                    SubscriptionConfig {
                        ack_deadline_seconds: ACK_DEADLINE_SECONDS,
                        ..Default::default()
                    },
                    None,
                )
                .await
                .context("failed to create subscription")?;
            tracing::info!(subscription = %subscription_name, topic = name, "subscription created");
        }

        let handlers = Arc::clone(&self.handlers);
        let topic_name = name.to_string();
        let loop_topic = topic_name.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let result = subscription
                .receive(
                    move |message, _cancel| {
                        let handlers = Arc::clone(&handlers);
                        let topic_name = topic_name.clone();
                        async move {
                            match Payload::decode(&message.message.data) {
                                Some(payload) => {
                                    let registered = handlers
                                        .read()
                                        .await
                                        .get(&topic_name)
                                        .cloned()
                                        .unwrap_or_default();
                                    dispatch(&topic_name, &registered, &payload);
                                    if let Err(status) = message.ack().await {
                                        tracing::error!(
                                            topic = %topic_name,
                                            error = %status,
                                            "failed to ack message"
                                        );
                                    }
                                }
                                None => {
                                    tracing::error!(
                                        topic = %topic_name,
                                        "failed to decode message; nacking for redelivery"
                                    );
                                    if let Err(status) = message.nack().await {
                                        tracing::error!(
                                            topic = %topic_name,
                                            error = %status,
                                            "failed to nack message"
                                        );
                                    }
                                }
                            }
                        }
                    },
                    cancel,
                    None,
                )
                .await;
            if let Err(status) = result {
                tracing::error!(topic = %loop_topic, error = %status, "receive loop ended");
            }
        });
        Ok(())
    }
}

#[async_trait]
impl EventBus for GcpEventBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) {
        let name = self.topic_name(topic);
        let data = match serde_json::to_vec(&payload) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!(topic = %name, error = %err, "failed to serialize payload");
                return;
            }
        };
        if let Err(err) = self.try_publish(&name, data).await {
            tracing::error!(topic = %name, error = %err, "publish failed");
        }
    }

    async fn subscribe(&self, topic: &str, handler: Handler) {
        let name = self.topic_name(topic);

        self.handlers
            .write()
            .await
            .entry(name.clone())
            .or_default()
            .push(handler);

        {
            let mut active = self.active.write().await;
            if active.contains(&name) {
                tracing::info!(topic = %name, "handler added to existing subscription");
                return;
            }
            active.insert(name.clone());
        }

        if let Err(err) = self.try_subscribe(&name).await {
            tracing::error!(topic = %name, error = %err, "subscribe failed");
            self.active.write().await.remove(&name);
            return;
        }
        tracing::info!(topic = %name, "subscriber registered");
    }
}
