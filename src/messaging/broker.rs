use crate::config::{Backend, MessageBrokerConfig};
use crate::messaging::memory::InMemoryBroker;
use crate::error::{Error, Result};
use crate::messaging::retry::{
    dead_letter_exchange, dead_letter_queue, RetryDecision, RetryPolicy, RETRY_HEADER,
};
use crate::metrics;
use async_trait::async_trait;
use deadpool_lapin::{Config, Manager, Pool};
use futures::future::BoxFuture;
use futures_util::stream::StreamExt;
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable},
    BasicProperties, Channel, ConnectionProperties, ExchangeKind,
};
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A consumed message as handed to its handler
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub payload: Value,
    /// Redeliveries so far, read from the retry header
    pub retry_count: u32,
    /// A failure now sends the message to the dead-letter queue
    pub last_attempt: bool,
}

impl ReceivedMessage {
    pub fn new(payload: Value, retry_count: u32, policy: &RetryPolicy) -> Self {
        Self {
            payload,
            retry_count,
            last_attempt: policy.is_last_attempt(retry_count),
        }
    }
}

/// Async handler invoked once per consumed message
pub type MessageHandler =
    Arc<dyn Fn(ReceivedMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(ReceivedMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// A work queue and the topic exchange bindings feeding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub queue: String,
    pub exchange: String,
    pub binding_keys: Vec<String>,
}

impl QueueSpec {
    pub fn new(queue: &str, exchange: &str, binding_keys: &[&str]) -> Self {
        Self {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            binding_keys: binding_keys.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Publish/consume with retry header, exponential backoff and dead-lettering.
///
/// A failing handler gets its message republished to the same queue with an
/// incremented `x-retry-count` after `base * 2^count`; once the count reaches
/// the configured maximum the message is rejected into `{queue}.dlq`.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a JSON message; `""` is the default exchange, routing straight to a queue
    async fn publish(&self, exchange: &str, routing_key: &str, message: &Value) -> Result<()>;

    /// Declare the queue with its dead-letter pair, bind it and start consuming.
    /// Returns a subscription id.
    async fn consume(&self, spec: QueueSpec, handler: MessageHandler) -> Result<String>;

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Stop every consumer
    async fn close(&self) -> Result<()>;
}

/// RabbitMQ message broker implementation
pub struct RabbitMqBroker {
    pool: Pool,
    config: MessageBrokerConfig,
    policy: RetryPolicy,
    subscriptions: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
    /// Channel shared by publishers
    channel: Arc<Mutex<Option<Channel>>>,
    declared_exchanges: Mutex<HashSet<String>>,
}

impl RabbitMqBroker {
    pub async fn new(config: MessageBrokerConfig) -> Result<Self> {
        let pool_config = Config {
            url: Some(config.uri.clone()),
            pool: Some(deadpool_lapin::PoolConfig {
                max_size: config.pool_size as usize,
                queue_mode: deadpool::managed::QueueMode::Fifo,
                timeouts: deadpool::managed::Timeouts {
                    wait: Some(Duration::from_millis(config.timeout_ms)),
                    create: Some(Duration::from_millis(config.timeout_ms)),
                    recycle: Some(Duration::from_millis(config.timeout_ms)),
                },
            }),
            connection_properties: ConnectionProperties::default(),
        };
        let pool = pool_config
            .create_pool(Some(deadpool_lapin::Runtime::Tokio1))
            .map_err(|e| Error::Config(format!("Invalid RabbitMQ pool configuration: {}", e)))?;

        let broker = Self {
            pool,
            policy: RetryPolicy::from_config(&config),
            config,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            channel: Arc::new(Mutex::new(None)),
            declared_exchanges: Mutex::new(HashSet::new()),
        };

        // Fail fast when the broker is unreachable
        broker.get_channel().await?;
        info!("RabbitMQ message broker initialized");

        Ok(broker)
    }

    /// Get a connection from the pool with retry
    async fn get_connection(&self) -> Result<deadpool::managed::Object<Manager>> {
        let mut attempts = 0;
        let max_attempts = self.config.retry_attempts.max(1);

        loop {
            attempts += 1;
            match self.pool.get().await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    if attempts >= max_attempts {
                        return Err(Error::TransientInfra(format!(
                            "Failed to get RabbitMQ connection after {} attempts: {}",
                            attempts, err
                        )));
                    }

                    warn!(
                        "Failed to get RabbitMQ connection (attempt {}/{}): {}",
                        attempts, max_attempts, err
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    async fn open_channel(&self) -> Result<Channel> {
        let conn = self.get_connection().await?;
        conn.create_channel()
            .await
            .map_err(|e| Error::TransientInfra(format!("Failed to create RabbitMQ channel: {}", e)))
    }

    /// Get the publishing channel or create a new one
    async fn get_channel(&self) -> Result<Channel> {
        let mut channel_guard = self.channel.lock().await;

        if let Some(channel) = &*channel_guard {
            if channel.status().connected() {
                return Ok(channel.clone());
            }
        }

        let channel = self.open_channel().await?;
        *channel_guard = Some(channel.clone());
        Ok(channel)
    }

    async fn ensure_exchange(&self, channel: &Channel, exchange: &str) -> Result<()> {
        if exchange.is_empty() {
            return Ok(());
        }
        let mut declared = self.declared_exchanges.lock().await;
        if declared.contains(exchange) {
            return Ok(());
        }
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| Error::TransientInfra(format!("Failed to declare exchange {}: {}", exchange, e)))?;
        declared.insert(exchange.to_string());
        Ok(())
    }

    /// Work queue plus `{queue}.dlx` (direct) and `{queue}.dlq`, bound to the source exchange
    async fn declare_queue_with_dlx(&self, channel: &Channel, spec: &QueueSpec) -> Result<()> {
        let dlx = dead_letter_exchange(&spec.queue);
        let dlq = dead_letter_queue(&spec.queue);
        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .exchange_declare(
                &dlx,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(&dlq, durable, FieldTable::default())
            .await?;
        channel
            .queue_bind(
                &dlq,
                &dlx,
                &spec.queue,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(dlx.clone().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(spec.queue.clone().into()),
        );
        channel.queue_declare(&spec.queue, durable, args).await?;

        self.ensure_exchange(channel, &spec.exchange).await?;
        for key in &spec.binding_keys {
            channel
                .queue_bind(
                    &spec.queue,
                    &spec.exchange,
                    key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
        }

        debug!("Declared queue {} with dead-letter queue {}", spec.queue, dlq);
        Ok(())
    }
}

#[async_trait]
impl MessageBroker for RabbitMqBroker {
    async fn publish(&self, exchange: &str, routing_key: &str, message: &Value) -> Result<()> {
        let body = serde_json::to_vec(message)?;
        let channel = self.get_channel().await?;
        self.ensure_exchange(&channel, exchange).await?;

        channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                persistent_properties(),
            )
            .await
            .map_err(|e| Error::TransientInfra(format!("Failed to publish message: {}", e)))?;

        debug!("Published message to {} with routing key {}", exchange, routing_key);
        Ok(())
    }

    async fn consume(&self, spec: QueueSpec, handler: MessageHandler) -> Result<String> {
        let channel = self.open_channel().await?;
        self.declare_queue_with_dlx(&channel, &spec).await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        let subscription_id = Uuid::new_v4().to_string();
        let mut consumer = channel
            .basic_consume(
                &spec.queue,
                &format!("vms-core-{}", subscription_id),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let policy = self.policy;
        let queue = spec.queue.clone();
        let handle = tokio::spawn(async move {
            info!("Started consumer for queue: {}", queue);

            while let Some(delivery) = consumer.next().await {
                match delivery {
                    Ok(delivery) => {
                        handle_delivery(&channel, &queue, &policy, &handler, delivery).await
                    }
                    Err(e) => {
                        error!("Error receiving message from {}: {}", queue, e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }

            info!("Consumer stopped for queue: {}", queue);
        });

        self.subscriptions
            .write()
            .await
            .insert(subscription_id.clone(), handle);

        Ok(subscription_id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;

        if let Some(handle) = subscriptions.remove(subscription_id) {
            handle.abort();
            info!("Unsubscribed: {}", subscription_id);
            Ok(())
        } else {
            Err(Error::NotFound(format!(
                "Subscription not found: {}",
                subscription_id
            )))
        }
    }

    async fn close(&self) -> Result<()> {
        for (_, handle) in self.subscriptions.write().await.drain() {
            handle.abort();
        }
        if let Some(channel) = self.channel.lock().await.take() {
            if channel.status().connected() {
                channel.close(200, "shutdown").await?;
            }
        }
        self.pool.close();
        info!("RabbitMQ message broker closed");
        Ok(())
    }
}

async fn handle_delivery(
    channel: &Channel,
    queue: &str,
    policy: &RetryPolicy,
    handler: &MessageHandler,
    delivery: Delivery,
) {
    let payload: Value = match serde_json::from_slice(&delivery.data) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Undecodable message on {}, dead-lettering: {}", queue, e);
            dead_letter(queue, &delivery).await;
            return;
        }
    };

    let retry_count = read_retry_count(&delivery.properties);
    let err = match handler(ReceivedMessage::new(payload, retry_count, policy)).await {
        Ok(()) => {
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                error!("Failed to acknowledge message: {}", e);
            }
            return;
        }
        Err(err) => err,
    };

    match policy.decide(retry_count) {
        RetryDecision::Retry { attempt, delay } => {
            warn!(
                "Handler failed on {} ({}), retry {}/{} in {:?}",
                queue, err, attempt, policy.max_retries, delay
            );
            tokio::time::sleep(delay).await;
            match republish(channel, queue, &delivery.data, attempt).await {
                Ok(()) => {
                    metrics::record_message_retried(queue);
                    if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                        error!("Failed to acknowledge retried message: {}", e);
                    }
                }
                Err(e) => {
                    error!("Failed to republish message on {}: {}", queue, e);
                    dead_letter(queue, &delivery).await;
                }
            }
        }
        RetryDecision::DeadLetter => {
            error!(
                "Handler failed on {} after {} retries, dead-lettering: {}",
                queue, retry_count, err
            );
            dead_letter(queue, &delivery).await;
        }
    }
}

async fn dead_letter(queue: &str, delivery: &Delivery) {
    metrics::record_message_dead_lettered(queue);
    if let Err(e) = delivery
        .reject(BasicRejectOptions { requeue: false })
        .await
    {
        error!("Failed to reject message: {}", e);
    }
}

async fn republish(channel: &Channel, queue: &str, body: &[u8], attempt: u32) -> Result<()> {
    let mut headers = FieldTable::default();
    headers.insert(RETRY_HEADER.into(), AMQPValue::LongInt(attempt as i32));

    channel
        .basic_publish(
            "",
            queue,
            BasicPublishOptions::default(),
            body,
            persistent_properties().with_headers(headers),
        )
        .await?;
    Ok(())
}

fn persistent_properties() -> BasicProperties {
    BasicProperties::default()
        .with_content_type("application/json".into())
        .with_delivery_mode(2)
}

fn read_retry_count(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers() else {
        return 0;
    };
    headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_HEADER)
        .and_then(|(_, value)| header_to_u32(value))
        .unwrap_or(0)
}

fn header_to_u32(value: &AMQPValue) -> Option<u32> {
    let n: i64 = match value {
        AMQPValue::ShortShortInt(v) => (*v).into(),
        AMQPValue::ShortShortUInt(v) => (*v).into(),
        AMQPValue::ShortInt(v) => (*v).into(),
        AMQPValue::ShortUInt(v) => (*v).into(),
        AMQPValue::LongInt(v) => (*v).into(),
        AMQPValue::LongUInt(v) => (*v).into(),
        AMQPValue::LongLongInt(v) => *v,
        _ => return None,
    };
    u32::try_from(n).ok()
}

/// Build the configured broker behind the trait object the services use
pub async fn create_message_broker(config: MessageBrokerConfig) -> Result<Arc<dyn MessageBroker>> {
    match config.backend {
        Backend::External => {
            let broker = RabbitMqBroker::new(config).await?;
            Ok(Arc::new(broker))
        }
        Backend::Memory => {
            warn!("Using the in-process message broker; messages are lost on exit");
            Ok(Arc::new(InMemoryBroker::new(RetryPolicy::from_config(&config))))
        }
    }
}

#[cfg(test)]
mod header_tests {
    use super::*;

    #[test]
    fn missing_header_counts_as_zero() {
        assert_eq!(read_retry_count(&BasicProperties::default()), 0);
    }

    #[test]
    fn retry_header_is_read_from_any_integer_width() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_HEADER.into(), AMQPValue::LongLongInt(2));
        let props = BasicProperties::default().with_headers(headers);
        assert_eq!(read_retry_count(&props), 2);

        let mut headers = FieldTable::default();
        headers.insert(RETRY_HEADER.into(), AMQPValue::ShortShortUInt(1));
        let props = BasicProperties::default().with_headers(headers);
        assert_eq!(read_retry_count(&props), 1);
    }

    #[test]
    fn negative_or_non_numeric_header_counts_as_zero() {
        let mut headers = FieldTable::default();
        headers.insert(RETRY_HEADER.into(), AMQPValue::LongInt(-4));
        assert_eq!(read_retry_count(&BasicProperties::default().with_headers(headers)), 0);

        let mut headers = FieldTable::default();
        headers.insert(RETRY_HEADER.into(), AMQPValue::LongString("3".into()));
        assert_eq!(read_retry_count(&BasicProperties::default().with_headers(headers)), 0);
    }
}
