pub mod locks;

pub use locks::KeyedLocks;
