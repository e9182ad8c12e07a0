use crate::error::{Error, Result};
use crate::messaging::broker::{MessageBroker, MessageHandler, QueueSpec, ReceivedMessage};
use crate::messaging::retry::{RetryDecision, RetryPolicy};
use crate::metrics;
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// One message sitting in a queue
#[derive(Debug, Clone)]
struct Envelope {
    payload: Value,
    retry_count: u32,
}

struct Binding {
    exchange: String,
    pattern: String,
    queue: String,
}

/// A message captured by `publish`
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Value,
}

/// Process-local broker with topic routing and the same retry/dead-letter rules as RabbitMQ.
/// Each queue is consumed sequentially, like a prefetch of one.
pub struct InMemoryBroker {
    policy: RetryPolicy,
    bindings: RwLock<Vec<Binding>>,
    queues: RwLock<HashMap<String, mpsc::UnboundedSender<Envelope>>>,
    dead_letters: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    published: Mutex<Vec<PublishedMessage>>,
    subscriptions: RwLock<HashMap<String, JoinHandle<()>>>,
}

impl InMemoryBroker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            bindings: RwLock::new(Vec::new()),
            queues: RwLock::new(HashMap::new()),
            dead_letters: Arc::new(Mutex::new(HashMap::new())),
            published: Mutex::new(Vec::new()),
            subscriptions: RwLock::new(HashMap::new()),
        }
    }

    /// Messages rejected into `{queue}.dlq`
    pub async fn dead_letters(&self, queue: &str) -> Vec<Value> {
        self.dead_letters
            .lock()
            .await
            .get(queue)
            .cloned()
            .unwrap_or_default()
    }

    /// Everything published through the broker, in order
    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().await.clone()
    }

    async fn deliver(&self, queue: &str, payload: Value) -> bool {
        match self.queues.read().await.get(queue) {
            Some(tx) => tx
                .send(Envelope {
                    payload,
                    retry_count: 0,
                })
                .is_ok(),
            None => false,
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, exchange: &str, routing_key: &str, message: &Value) -> Result<()> {
        self.published.lock().await.push(PublishedMessage {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            payload: message.clone(),
        });

        if exchange.is_empty() {
            if !self.deliver(routing_key, message.clone()).await {
                debug!("No queue named {}, message dropped", routing_key);
            }
            return Ok(());
        }

        let targets: Vec<String> = self
            .bindings
            .read()
            .await
            .iter()
            .filter(|b| b.exchange == exchange && topic_matches(&b.pattern, routing_key))
            .map(|b| b.queue.clone())
            .collect();
        if targets.is_empty() {
            debug!("Unroutable message on {} ({})", exchange, routing_key);
        }
        for queue in targets {
            self.deliver(&queue, message.clone()).await;
        }
        Ok(())
    }

    async fn consume(&self, spec: QueueSpec, handler: MessageHandler) -> Result<String> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        {
            let mut queues = self.queues.write().await;
            if queues.contains_key(&spec.queue) {
                return Err(Error::Conflict(format!(
                    "Queue {} already has a consumer",
                    spec.queue
                )));
            }
            queues.insert(spec.queue.clone(), tx.clone());
        }
        {
            let mut bindings = self.bindings.write().await;
            for key in &spec.binding_keys {
                bindings.push(Binding {
                    exchange: spec.exchange.clone(),
                    pattern: key.clone(),
                    queue: spec.queue.clone(),
                });
            }
        }

        let policy = self.policy;
        let dead_letters = self.dead_letters.clone();
        let queue = spec.queue.clone();
        let handle = tokio::spawn(async move {
            info!("Started in-memory consumer for queue: {}", queue);
            while let Some(envelope) = rx.recv().await {
                let message =
                    ReceivedMessage::new(envelope.payload.clone(), envelope.retry_count, &policy);
                let err = match handler(message).await {
                    Ok(()) => continue,
                    Err(err) => err,
                };
                match policy.decide(envelope.retry_count) {
                    RetryDecision::Retry { attempt, delay } => {
                        warn!(
                            "Handler failed on {} ({}), retry {}/{} in {:?}",
                            queue, err, attempt, policy.max_retries, delay
                        );
                        tokio::time::sleep(delay).await;
                        metrics::record_message_retried(&queue);
                        let _ = tx.send(Envelope {
                            payload: envelope.payload,
                            retry_count: attempt,
                        });
                    }
                    RetryDecision::DeadLetter => {
                        error!(
                            "Handler failed on {} after {} retries, dead-lettering: {}",
                            queue, envelope.retry_count, err
                        );
                        metrics::record_message_dead_lettered(&queue);
                        dead_letters
                            .lock()
                            .await
                            .entry(queue.clone())
                            .or_default()
                            .push(envelope.payload);
                    }
                }
            }
        });

        let subscription_id = Uuid::new_v4().to_string();
        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), handle);
        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        match self.subscriptions.write().await.remove(subscription_id) {
            Some(handle) => {
                handle.abort();
                Ok(())
            }
            None => Err(Error::NotFound(format!(
                "Subscription not found: {}",
                subscription_id
            ))),
        }
    }

    async fn close(&self) -> Result<()> {
        for (_, handle) in self.subscriptions.write().await.drain() {
            handle.abort();
        }
        self.queues.write().await.clear();
        self.bindings.write().await.clear();
        Ok(())
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` is zero or more
pub fn topic_matches(pattern: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = routing_key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => (0..=key.len()).any(|skip| match_words(rest, &key[skip..])),
        Some((word, rest)) => match key.split_first() {
            Some((first, key_rest)) => {
                (*word == "*" || word == first) && match_words(rest, key_rest)
            }
            None => false,
        },
    }
}
