//! Concrete cache stores

pub mod memory;
pub mod redis;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;
