//! 🚽 The flush client: one batch in, one `RPUSH` out.
//!
//! Lives on the flusher thread, together with the little current-thread `tokio` runtime
//! that drives the store's futures. Nothing here ever runs on a caller's thread, so
//! nothing here ever needs to care whether the caller has a runtime of its own.
//!
//! ⚠️ A failed push is reported, counted, and then forgotten. No retry, no requeue.
//! The next batch starts with a clean slate.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::{Builder, Runtime};
use tracing::debug;

use crate::backends::{Store, StoreBackend};
use crate::stats::PipelineStats;
use crate::status::{StatusKind, StatusReporter};

/// 📬 What happened to a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    /// nothing to push
    Skipped,
    /// landed. `length` is the list length the store reported afterwards.
    Pushed { documents: usize, length: u64 },
    /// reported and dropped
    Failed { documents: usize },
}

#[derive(Debug)]
pub(crate) struct FlushClient {
    store: StoreBackend,
    key: String,
    runtime: Runtime,
    status: StatusReporter,
    stats: Arc<PipelineStats>,
}

impl FlushClient {
    pub(crate) fn new(
        store: StoreBackend,
        key: String,
        status: StatusReporter,
        stats: Arc<PipelineStats>,
    ) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .context("💀 Failed to build the flusher's tokio runtime. The runtime refused to be born.")?;
        Ok(Self {
            store,
            key,
            runtime,
            status,
            stats,
        })
    }

    /// 📡 Connect (if needed) and make sure the store answers.
    pub(crate) fn probe(&mut self) -> Result<()> {
        self.runtime
            .block_on(self.store.probe())
            .context("💀 The store did not answer the startup probe.")
    }

    /// 📦 Push the whole batch as one command, preserving its order.
    pub(crate) fn push(&mut self, batch: &[String]) -> PushOutcome {
        if batch.is_empty() {
            return PushOutcome::Skipped;
        }

        let documents = batch.len();
        match self
            .runtime
            .block_on(self.store.append_to_list(&self.key, batch))
        {
            Ok(length) => {
                debug!(documents, length, key = %self.key, "📦 Batch pushed");
                self.stats.pushed(documents);
                PushOutcome::Pushed { documents, length }
            }
            Err(err) => {
                self.stats.push_failed(documents);
                self.status.error(
                    StatusKind::PushFailure,
                    format!("Dropped a batch of {documents} documents bound for '{}': {err:#}", self.key),
                );
                PushOutcome::Failed { documents }
            }
        }
    }

    /// 🗑️ Let go of the store's connections. Failures are reported, not returned:
    /// by now there is nobody left to hand them to.
    pub(crate) fn close(mut self) {
        if let Err(err) = self.runtime.block_on(self.store.close()) {
            self.status.warn(
                StatusKind::StageFault,
                format!("Closing the store failed: {err:#}"),
            );
        }
    }
}
