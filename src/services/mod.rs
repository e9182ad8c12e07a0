pub mod clip;
pub mod recording;
pub mod stream;
pub mod thumbnail;

pub use clip::ClipService;
pub use recording::RecordingService;
pub use stream::StreamService;
pub use thumbnail::ThumbnailService;
