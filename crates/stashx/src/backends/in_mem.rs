//! 🧪 A store that lives entirely in RAM, gone the moment you blink.
//!
//! ⚠️ This is NOT for production. This is for tests, dry runs, and the CLI's
//! `--dry-run`. It records every push, and it can be switched offline to play the part
//! of a redis that fell over.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::Store;

/// 📦 A store that never forgets.
///
/// Clone-able because tests need to peek inside after handing the store to the appender.
/// Every clone shares the same lists.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    online: bool,
    closed: bool,
    /// 💣 blow up inside the next push, once
    panic_next_push: bool,
    lists: HashMap<String, Vec<String>>,
    /// one entry per successful `append_to_list`, in arrival order
    pushes: Vec<Vec<String>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                online: true,
                closed: false,
                panic_next_push: false,
                lists: HashMap::new(),
                pushes: Vec::new(),
            })),
        }
    }

    /// 🔌 Offline stores fail every probe and every push until switched back.
    pub fn set_online(&self, online: bool) {
        self.inner.lock().online = online;
    }

    /// Everything ever pushed onto `key`, oldest first.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.inner.lock().lists.get(key).cloned().unwrap_or_default()
    }

    /// Each successful push as the batch it arrived in.
    pub fn pushes(&self) -> Vec<Vec<String>> {
        self.inner.lock().pushes.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    #[cfg(test)]
    pub(crate) fn panic_on_next_push(&self) {
        self.inner.lock().panic_next_push = true;
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn probe(&mut self) -> Result<()> {
        if !self.inner.lock().online {
            bail!("💀 The in-memory store is offline. Someone pulled the imaginary plug.");
        }
        Ok(())
    }

    async fn append_to_list(&mut self, key: &str, documents: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock();
        if std::mem::take(&mut inner.panic_next_push) {
            drop(inner);
            panic!("💣 the in-memory store was told to explode");
        }
        if !inner.online {
            bail!(
                "💀 The in-memory store is offline. {} documents bounce off the RAM.",
                documents.len()
            );
        }
        let list = inner.lists.entry(key.to_owned()).or_default();
        list.extend_from_slice(documents);
        let length = list.len() as u64;
        inner.pushes.push(documents.to_vec());
        Ok(length)
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.lock().closed = true;
        Ok(())
    }
}
