pub mod app;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod media;
pub mod messaging;
pub mod metrics;
pub mod recorder;
pub mod services;
pub mod storage;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-export main components for easier use
pub use app::App;
pub use error::{Error, Result};
