pub mod broker;
pub mod commands;
pub mod event;
pub mod events_publisher;
pub mod memory;
pub mod retry;

pub use broker::{
    create_message_broker, handler_fn, MessageBroker, MessageHandler, QueueSpec,
    RabbitMqBroker, ReceivedMessage,
};
pub use commands::{CreateClipMessage, RecordingCommand};
pub use event::{EventMessage, EventType};
pub use events_publisher::EventPublisher;
pub use memory::InMemoryBroker;
pub use retry::{RetryDecision, RetryPolicy};
