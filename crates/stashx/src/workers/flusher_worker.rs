//! 🚽 The FlusherWorker: stage 1, the end of the line.
//!
//! Takes the documents the formatter left behind, in sequence order, and pushes them in
//! batches. A batch ends where the available run ends: whatever was ready when we
//! looked goes out in one `RPUSH`. Busy producers make big batches, quiet ones make
//! small ones, and nobody waits on a timer.
//!
//! 🧠 Knowledge graph:
//! - The thread builds its own [`FlushClient`] (and with it, its own runtime), probes the
//!   store, and reports the probe result on the `ready` channel before touching the ring.
//!   `Appender::start` waits on that channel.
//! - Slots are released as soon as their documents are in the batch, before the push.
//!   A slow store holds the batch, not the ring.
//! - A push that panics costs its batch and nothing more. The stage keeps draining, or
//!   every producer would end up parked on a full ring.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use anyhow::{Context, Result};
use async_channel::Sender;
use tracing::debug;

use super::{LogSlot, Worker, panic_message};
use crate::backends::StoreBackend;
use crate::flush_client::FlushClient;
use crate::ring::{Available, Sequence, StageCursor};
use crate::stats::PipelineStats;
use crate::status::{StatusKind, StatusReporter};

/// 📬 The probe verdict sent back to `start`. The error is pre-rendered, since
/// `anyhow::Error` would have to cross threads with all its context intact.
pub(crate) type ReadySignal = std::result::Result<(), String>;

#[derive(Debug)]
pub(crate) struct FlusherWorker {
    cursor: StageCursor<LogSlot>,
    store: StoreBackend,
    key: String,
    ready: Sender<ReadySignal>,
    status: StatusReporter,
    stats: Arc<PipelineStats>,
}

impl FlusherWorker {
    pub(crate) fn new(
        cursor: StageCursor<LogSlot>,
        store: StoreBackend,
        key: String,
        ready: Sender<ReadySignal>,
        status: StatusReporter,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            cursor,
            store,
            key,
            ready,
            status,
            stats,
        }
    }

    fn run(self) -> Result<()> {
        let Self {
            cursor,
            store,
            key,
            ready,
            status,
            stats,
        } = self;

        let connected = FlushClient::new(store, key, status.clone(), Arc::clone(&stats))
            .and_then(|mut client| {
                client.probe()?;
                Ok(client)
            });
        let mut client = match connected {
            Ok(client) => {
                // -- 📬 nobody listening means start gave up on us. carry on, the ring will close.
                let _ = ready.send_blocking(Ok(()));
                client
            }
            Err(err) => {
                let _ = ready.send_blocking(Err(format!("{err:#}")));
                return Err(err);
            }
        };

        debug!("🚽 Flusher stage started");
        let mut batch: Vec<String> = Vec::new();
        let mut next: Sequence = 0;
        loop {
            match cursor.wait_for(next) {
                Available::UpTo(end) => {
                    for seq in next..=end {
                        if let Some(document) = cursor.read(seq, |slot| slot.document.take()) {
                            batch.push(document);
                        }
                    }
                    cursor.advance(end);
                    next = end + 1;

                    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| client.push(&batch))) {
                        stats.push_failed(batch.len());
                        status.error(
                            StatusKind::StageFault,
                            format!(
                                "Pushing a batch of {} documents panicked: {}",
                                batch.len(),
                                panic_message(payload.as_ref())
                            ),
                        );
                    }
                    batch.clear();
                }
                Available::Drained => {
                    debug!(released = next, "🏁 Flusher stage drained. Closing the store.");
                    client.close();
                    return Ok(());
                }
            }
        }
    }
}

impl Worker for FlusherWorker {
    fn start(self) -> Result<JoinHandle<Result<()>>> {
        Builder::new()
            .name("stashx-flusher".into())
            .spawn(move || self.run())
            .context("💀 Failed to spawn the flusher thread. The OS said no.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryStore;
    use crate::ring::TransferBuffer;
    use crate::workers::{FLUSHER_STAGE, FORMATTER_STAGE, STAGE_COUNT};

    #[test]
    fn the_one_where_an_available_run_goes_out_as_one_batch() -> Result<()> {
        let ring = Arc::new(TransferBuffer::<LogSlot>::new(8, STAGE_COUNT)?);
        let store = InMemoryStore::new();
        let (ready_tx, ready_rx) = async_channel::bounded(1);
        let worker = FlusherWorker::new(
            ring.stage(FLUSHER_STAGE)?,
            store.clone().into(),
            "logstash".into(),
            ready_tx,
            StatusReporter::new(8),
            Arc::new(PipelineStats::default()),
        );
        let handle = worker.start()?;
        assert_eq!(ready_rx.recv_blocking()?, Ok(()));

        // -- 🎭 play the formatter: three documents, released together
        for doc in ["one", "two", "three"] {
            let seq = ring.claim()?;
            ring.write(
                seq,
                LogSlot {
                    event: None,
                    document: Some(doc.to_string()),
                },
            );
            ring.publish(seq);
        }
        let formatter = ring.stage(FORMATTER_STAGE)?;
        assert_eq!(formatter.wait_for(0), Available::UpTo(2));
        formatter.advance(2);

        ring.close();
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("flusher thread panicked"))??;

        assert_eq!(store.pushes(), vec![vec!["one", "two", "three"]]);
        assert!(store.is_closed());
        Ok(())
    }

    fn release_one(ring: &TransferBuffer<LogSlot>, formatter: &StageCursor<LogSlot>, doc: &str) -> Result<()> {
        let seq = ring.claim()?;
        ring.write(
            seq,
            LogSlot {
                event: None,
                document: Some(doc.to_string()),
            },
        );
        ring.publish(seq);
        assert_eq!(formatter.wait_for(seq), Available::UpTo(seq));
        formatter.advance(seq);
        Ok(())
    }

    #[test]
    fn the_one_where_a_panicking_push_costs_one_batch_and_the_stage_lives_on() -> Result<()> {
        let ring = Arc::new(TransferBuffer::<LogSlot>::new(2, STAGE_COUNT)?);
        let store = InMemoryStore::new();
        let status = StatusReporter::new(8);
        let faults = status.subscribe();
        let stats = Arc::new(PipelineStats::default());
        let (ready_tx, ready_rx) = async_channel::bounded(1);
        let handle = FlusherWorker::new(
            ring.stage(FLUSHER_STAGE)?,
            store.clone().into(),
            "logstash".into(),
            ready_tx,
            status,
            Arc::clone(&stats),
        )
        .start()?;
        assert_eq!(ready_rx.recv_blocking()?, Ok(()));
        let formatter = ring.stage(FORMATTER_STAGE)?;

        store.panic_on_next_push();
        release_one(&ring, &formatter, "doomed")?;
        let fault = faults.recv_blocking()?;
        assert_eq!(fault.kind, StatusKind::StageFault);
        assert!(fault.message.contains("explode"), "{}", fault.message);

        // -- 🎡 a capacity-2 ring only keeps turning if the flusher is still releasing slots
        for doc in ["one", "two", "three"] {
            release_one(&ring, &formatter, doc)?;
        }
        ring.close();
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("flusher thread panicked"))??;

        assert_eq!(store.list("logstash"), vec!["one", "two", "three"]);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.failed_pushes, 1);
        assert_eq!(snapshot.dropped_documents, 1);
        assert!(store.is_closed());
        Ok(())
    }

    #[test]
    fn the_one_where_an_offline_store_fails_the_handshake() -> Result<()> {
        let ring = Arc::new(TransferBuffer::<LogSlot>::new(8, STAGE_COUNT)?);
        let store = InMemoryStore::new();
        store.set_online(false);
        let (ready_tx, ready_rx) = async_channel::bounded(1);
        let handle = FlusherWorker::new(
            ring.stage(FLUSHER_STAGE)?,
            store.into(),
            "logstash".into(),
            ready_tx,
            StatusReporter::new(8),
            Arc::new(PipelineStats::default()),
        )
        .start()?;

        let verdict = ready_rx.recv_blocking()?;
        assert!(verdict.is_err_and(|message| message.contains("offline")));
        assert!(handle.join().map_err(|_| anyhow::anyhow!("panicked"))?.is_err());
        Ok(())
    }
}
