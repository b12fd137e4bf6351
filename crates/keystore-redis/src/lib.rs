//! Redis-backed slot store for sealed key material.
//! Slots live under one namespace prefix; shredding scans that namespace and
//! deletes whatever it finds within a bounded time.

pub mod addressing;
pub mod client;
pub mod codec;
pub mod config;
pub mod memory;
pub mod shred;
pub mod store;

pub use addressing::Namespace;
pub use client::{KvClient, KvError, RedisClient};
pub use config::RedisKeyStoreConfig;
pub use memory::MemoryKv;
pub use shred::{ShredMode, ShredOptions, ShredReport};
pub use store::{LifecycleState, RedisSlotStore};
