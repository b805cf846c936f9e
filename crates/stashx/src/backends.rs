//! 🔌 Backends: where the documents finally land.
//!
//! 🎭 One trait, [`Store`], and one enum, [`StoreBackend`], that dispatches to whichever
//! concrete store the config asked for. The flusher only ever talks to the enum. It does
//! not know, or care, whether the list lives in redis or in a `Vec` in RAM.
//!
//! 🦆 The duck lives here now. It moved with the rest of us.

use anyhow::Result;
use async_trait::async_trait;

use crate::app_config::StoreConfig;

pub mod in_mem;
pub mod redis;

pub use in_mem::InMemoryStore;
pub use redis::RedisStore;

/// 🕳️ A remote list that accepts documents in batches.
///
/// # Contract
/// - `probe` is one cheap round trip that proves the store is reachable and willing.
/// - `append_to_list` appends every document to the tail of `key`, in order, in ONE
///   command, and returns the list length the store reports afterwards.
/// - `close` lets go of whatever connections are held. Calling anything after is a bug.
#[async_trait]
pub trait Store: std::fmt::Debug + Send {
    async fn probe(&mut self) -> Result<()>;
    async fn append_to_list(&mut self, key: &str, documents: &[String]) -> Result<u64>;
    async fn close(&mut self) -> Result<()>;
}

/// 🎭 The many faces of a store. Enum dispatch, no boxes, no vtables.
#[derive(Debug)]
pub enum StoreBackend {
    Redis(RedisStore),
    InMemory(InMemoryStore),
}

impl StoreBackend {
    /// 🏗️ Build the store the config names. Nothing is connected yet: that happens on
    /// the first `probe`, on the flusher's thread.
    pub fn from_config(config: &StoreConfig) -> Self {
        match config {
            StoreConfig::Redis(redis) => StoreBackend::Redis(RedisStore::new(redis.clone())),
            StoreConfig::InMemory => StoreBackend::InMemory(InMemoryStore::new()),
        }
    }
}

impl From<RedisStore> for StoreBackend {
    fn from(store: RedisStore) -> Self {
        StoreBackend::Redis(store)
    }
}

impl From<InMemoryStore> for StoreBackend {
    fn from(store: InMemoryStore) -> Self {
        StoreBackend::InMemory(store)
    }
}

#[async_trait]
impl Store for StoreBackend {
    async fn probe(&mut self) -> Result<()> {
        match self {
            StoreBackend::Redis(store) => store.probe().await,
            StoreBackend::InMemory(store) => store.probe().await,
        }
    }

    async fn append_to_list(&mut self, key: &str, documents: &[String]) -> Result<u64> {
        match self {
            StoreBackend::Redis(store) => store.append_to_list(key, documents).await,
            StoreBackend::InMemory(store) => store.append_to_list(key, documents).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        match self {
            StoreBackend::Redis(store) => store.close().await,
            StoreBackend::InMemory(store) => store.close().await,
        }
    }
}
