pub mod audit;
pub mod clip;
pub mod events;
pub mod recording;
pub mod retention_policy;
pub mod stream;
pub mod timeline;

pub use audit::{AuditAction, AuditRecord};
pub use clip::{Clip, ClipSnapshot, ClipStatus};
pub use events::DomainEvent;
pub use recording::{Recording, RecordingSnapshot, RecordingStatus};
pub use retention_policy::RetentionPolicy;
pub use stream::{Stream, StreamSnapshot, StreamStatus};
pub use timeline::{RecordedSpan, Timeline, TimelineSegment};
