use super::{dispatch, qualified_topic, EventBus, Handler, Payload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

const CHANNEL_CAPACITY: usize = 256;
const REDELIVERY_DELAY: Duration = Duration::from_millis(50);

/// Delivery counters. Lets tests observe the idempotent-subscribe and
/// nack-redelivery contracts without reaching into the bus internals.
#[derive(Debug, Default)]
pub struct BusStats {
    loops_started: AtomicU64,
    acked: AtomicU64,
    nacked: AtomicU64,
}

impl BusStats {
    pub fn loops_started(&self) -> u64 {
        self.loops_started.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn nacked(&self) -> u64 {
        self.nacked.load(Ordering::SeqCst)
    }
}

struct TopicChannel {
    tx: mpsc::Sender<Vec<u8>>,
    // Held until the first subscriber starts the consumption loop.
    rx: Option<mpsc::Receiver<Vec<u8>>>,
    consuming: bool,
}

impl TopicChannel {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            rx: Some(rx),
            consuming: false,
        }
    }
}

/// In-process [`EventBus`] with the same delivery contract as the Pub/Sub
/// implementation: one consumption loop per topic, ack after handler
/// dispatch, nack plus delayed redelivery for undecodable payloads.
pub struct InMemoryEventBus {
    environment: Option<String>,
    topics: Mutex<HashMap<String, TopicChannel>>,
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
    stats: Arc<BusStats>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_environment(None)
    }

    pub fn with_environment(environment: Option<String>) -> Self {
        Self {
            environment,
            topics: Mutex::new(HashMap::new()),
            handlers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(BusStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<BusStats> {
        Arc::clone(&self.stats)
    }

    /// Enqueues raw bytes without serialization. Messages queued before the
    /// first subscriber are delivered once its loop starts.
    pub async fn publish_raw(&self, topic: &str, data: Vec<u8>) {
        let name = qualified_topic(topic, self.environment.as_deref());
        let tx = {
            let mut topics = self.topics.lock().await;
            topics
                .entry(name.clone())
                .or_insert_with(TopicChannel::new)
                .tx
                .clone()
        };
        if tx.send(data).await.is_err() {
            tracing::error!(topic = %name, "topic channel closed; message dropped");
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, payload: serde_json::Value) {
        match serde_json::to_vec(&payload) {
            Ok(data) => self.publish_raw(topic, data).await,
            Err(err) => {
                tracing::error!(topic, error = %err, "failed to serialize payload");
            }
        }
    }

    async fn subscribe(&self, topic: &str, handler: Handler) {
        let name = qualified_topic(topic, self.environment.as_deref());

        self.handlers
            .write()
            .await
            .entry(name.clone())
            .or_default()
            .push(handler);

        let mut topics = self.topics.lock().await;
        let channel = topics.entry(name.clone()).or_insert_with(TopicChannel::new);
        if channel.consuming {
            tracing::info!(topic = %name, "handler added to existing subscription");
            return;
        }
        channel.consuming = true;
        let Some(rx) = channel.rx.take() else {
            tracing::error!(topic = %name, "topic receiver already taken");
            return;
        };
        let redelivery_tx = channel.tx.clone();
        drop(topics);

        self.stats.loops_started.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(consume(
            name,
            rx,
            redelivery_tx,
            Arc::clone(&self.handlers),
            Arc::clone(&self.stats),
        ));
    }
}

async fn consume(
    topic: String,
    mut rx: mpsc::Receiver<Vec<u8>>,
    redelivery_tx: mpsc::Sender<Vec<u8>>,
    handlers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
    stats: Arc<BusStats>,
) {
    while let Some(data) = rx.recv().await {
        match Payload::decode(&data) {
            Some(payload) => {
                let registered = handlers
                    .read()
                    .await
                    .get(&topic)
                    .cloned()
                    .unwrap_or_default();
                dispatch(&topic, &registered, &payload);
                stats.acked.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(%topic, "message processed");
            }
            None => {
                // Negative acknowledgment: the message goes back on the
                // queue after a delay. A permanently malformed payload
                // redelivers forever, matching the transport contract.
                stats.nacked.fetch_add(1, Ordering::SeqCst);
                tracing::error!(%topic, "failed to decode message; scheduling redelivery");
                let tx = redelivery_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(REDELIVERY_DELAY).await;
                    let _ = tx.send(data).await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::handler;
    use serde_json::Value;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    #[tokio::test]
    async fn delivers_published_payload_to_handler() {
        let bus = InMemoryEventBus::new();
        let (tx, mut rx) = mpsc::channel::<Payload>(1);
        bus.subscribe(
            "score",
            handler(move |payload| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(payload).await;
                }
            }),
        )
        .await;

        bus.publish("score", Value::String("C9".to_string())).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, Payload::Text("C9".to_string()));
        assert_eq!(bus.stats().acked(), 1);
    }

    #[tokio::test]
    async fn second_subscriber_reuses_the_consumption_loop() {
        let bus = InMemoryEventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        for _ in 0..2 {
            let hits = Arc::clone(&hits);
            bus.subscribe(
                "score",
                handler(move |_| {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await;
        }

        bus.publish("score", Value::String("C1".to_string())).await;
        settle().await;

        assert_eq!(bus.stats().loops_started(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stats().acked(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_nacked_and_reaches_no_handler() {
        let bus = InMemoryEventBus::new();
        let hits = Arc::new(AtomicU64::new(0));
        let observed = Arc::clone(&hits);
        bus.subscribe(
            "score",
            handler(move |_| {
                let hits = Arc::clone(&observed);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .await;

        bus.publish_raw("score", b"{not json".to_vec()).await;
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(bus.stats().acked(), 0);
        assert!(bus.stats().nacked() >= 1);
    }

    #[tokio::test]
    async fn panicking_handler_does_not_stop_the_loop_or_siblings() {
        let bus = InMemoryEventBus::new();
        let hits = Arc::new(AtomicU64::new(0));

        bus.subscribe(
            "score",
            handler(|_| async {
                panic!("handler fault");
            }),
        )
        .await;
        let observed = Arc::clone(&hits);
        bus.subscribe(
            "score",
            handler(move |_| {
                let hits = Arc::clone(&observed);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .await;

        bus.publish("score", Value::String("C1".to_string())).await;
        bus.publish("score", Value::String("C2".to_string())).await;
        settle().await;

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(bus.stats().acked(), 2);
    }

    #[tokio::test]
    async fn environment_tag_scopes_topics() {
        let bus = InMemoryEventBus::with_environment(Some("staging".to_string()));
        let (tx, mut rx) = mpsc::channel::<Payload>(1);
        bus.subscribe(
            "score",
            handler(move |payload| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(payload).await;
                }
            }),
        )
        .await;

        bus.publish("score", Value::String("C1".to_string())).await;

        assert!(rx.recv().await.is_some());
    }
}
