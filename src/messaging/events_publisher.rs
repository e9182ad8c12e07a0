use crate::domain::DomainEvent;
use crate::error::Result;
use crate::messaging::broker::MessageBroker;
use crate::messaging::event::{EventMessage, EventType};
use log::{debug, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Helper for publishing lifecycle events on the events exchange.
///
/// Publishing is best-effort: the state change has already been persisted,
/// so a broker failure is logged and never surfaces to the caller.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn MessageBroker>,
    exchange: String,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn MessageBroker>, exchange: &str) -> Self {
        Self {
            broker,
            exchange: exchange.to_string(),
        }
    }

    /// Flush events drained from an entity after its repository write succeeded
    pub async fn publish_domain(&self, events: Vec<DomainEvent>) {
        for event in &events {
            match EventMessage::from_domain(event) {
                Ok(message) => self.send(&message).await,
                Err(e) => warn!("Failed to encode domain event {:?}: {}", event, e),
            }
        }
    }

    pub async fn publish<T: Serialize>(
        &self,
        event_type: EventType,
        source_id: Option<Uuid>,
        payload: T,
    ) {
        match EventMessage::new(event_type, source_id, payload) {
            Ok(message) => self.send(&message).await,
            Err(e) => warn!("Failed to encode {} event: {}", event_type, e),
        }
    }

    async fn send(&self, message: &EventMessage) {
        if let Err(e) = self.try_send(message).await {
            warn!("Failed to publish {} event {}: {}", message.event_type, message.id, e);
            return;
        }
        debug!("Published {} event {}", message.event_type, message.id);
    }

    async fn try_send(&self, message: &EventMessage) -> Result<()> {
        let body = serde_json::to_value(message)?;
        self.broker
            .publish(&self.exchange, &message.routing_key(), &body)
            .await
    }
}
