pub mod gcp;
pub mod memory;

pub use gcp::GcpEventBus;
pub use memory::InMemoryEventBus;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Decoded message payload. The wire format is JSON; the common case is a
/// bare string (a client id), with a generic fallback for structured values.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    /// String-first decode with a generic JSON fallback. `None` means the
    /// bytes are not valid JSON at all and the message must be nacked.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if let Ok(text) = serde_json::from_slice::<String>(data) {
            return Some(Self::Text(text));
        }
        serde_json::from_slice::<serde_json::Value>(data)
            .ok()
            .map(Self::Json)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Json(_) => None,
        }
    }
}

/// A subscriber callback. Boxed so implementations can hold heterogeneous
/// handlers in one registry.
pub type Handler = Arc<dyn Fn(Payload) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Payload) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |payload| -> BoxFuture<'static, ()> { Box::pin(f(payload)) })
}

/// Publish/subscribe capability decoupling request submission from scoring.
///
/// `publish` is fire-and-forget: send confirmation is observed asynchronously
/// and only logged, so callers never learn of publish failure synchronously.
/// `subscribe` is idempotent with respect to the delivery channel: a second
/// handler on an already-subscribed topic joins the existing consumption
/// loop instead of creating another one.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, topic: &str, payload: serde_json::Value);
    async fn subscribe(&self, topic: &str, handler: Handler);
}

/// Topic names carry the deployment environment as a suffix so several
/// environments can share one project.
pub fn qualified_topic(base: &str, environment: Option<&str>) -> String {
    match environment {
        Some(env) => format!("{base}-{env}"),
        None => base.to_string(),
    }
}

/// Runs every handler as its own task. A handler that panics is logged as a
/// handler-local fault; it never reaches the consumption loop or blocks
/// sibling handlers, and the message is still acknowledged.
pub(crate) fn dispatch(topic: &str, handlers: &[Handler], payload: &Payload) {
    for handler in handlers {
        let task = tokio::spawn(handler(payload.clone()));
        let topic = topic.to_string();
        tokio::spawn(async move {
            if let Err(err) = task.await {
                if err.is_panic() {
                    tracing::error!(%topic, "event handler panicked");
                }
            }
        });
    }
}
