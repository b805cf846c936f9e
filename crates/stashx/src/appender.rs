//! 🚀 The Appender: the one type a host actually holds.
//!
//! 🎬 *[a caller thread logs a line. it does not wait for redis. it never will.]*
//!
//! 🧠 Knowledge graph:
//! - `append` runs on the caller's thread: resolve deferred fields, capture a
//!   [`RawEvent`], then claim, write, publish. The only way it blocks is a full ring.
//! - The formatter and flusher stages each run on their own named OS thread.
//! - The shared ring handle sits behind a `RwLock<Option<..>>`. `stop` takes it out
//!   first, so new appends see "no ring" and never reach a ring that is going away.
//! - `stop` then closes the ring (blocked producers wake up and fail fast), joins the
//!   stages after they drain everything that was claimed, and closes the store.
//! - Lifecycle is one shot: Idle → Running → Draining → Stopped, or Idle → Failed.
//!
//! ⚠️ Nothing that goes wrong on a stage thread is ever thrown at a caller. It shows up
//! in `tracing` and on the [`crate::Appender::status`] channel instead.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::app_config::AppenderConfig;
use crate::backends::StoreBackend;
use crate::common::{LoggingEvent, RawEvent};
use crate::ring::TransferBuffer;
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::status::{StatusKind, StatusReceiver, StatusReporter};
use crate::workers::{
    FLUSHER_STAGE, FORMATTER_STAGE, FlusherWorker, FormatterWorker, LogSlot, STAGE_COUNT, Worker,
    panic_message,
};

/// 🚦 Where the appender is in its one-shot life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppenderState {
    Idle,
    Running,
    /// stop has begun; the stages are draining
    Draining,
    Stopped,
    /// start was attempted and did not make it
    Failed,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum StartError {
    #[error("💀 invalid appender configuration: {0}")]
    Config(String),
    #[error("💀 the store is unreachable or refused the probe: {0}")]
    Store(String),
    #[error("💀 this appender has already been started (or stopped, or failed). Appenders are one shot.")]
    AlreadyStarted,
    #[error("💀 failed to spawn a pipeline stage: {0}")]
    Spawn(String),
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    #[error("💀 append called on an appender that is not running")]
    NotStarted,
    #[error("🚪 append raced with stop; the event was not delivered")]
    PublishAfterShutdown,
}

/// Start/stop bookkeeping, only touched with the lifecycle lock held.
#[derive(Debug, Default)]
struct Lifecycle {
    /// handed in by `with_store`, consumed by `start`
    store: Option<StoreBackend>,
    stages: Vec<JoinHandle<Result<()>>>,
}

/// 🚀 Non-blocking logstash appender. Share it behind an `Arc` and call
/// [`Appender::append`] from as many threads as you like.
#[derive(Debug)]
pub struct Appender {
    config: AppenderConfig,
    state: Mutex<AppenderState>,
    lifecycle: Mutex<Lifecycle>,
    buffer: RwLock<Option<Arc<TransferBuffer<LogSlot>>>>,
    status: StatusReporter,
    stats: Arc<PipelineStats>,
}

impl Appender {
    /// 🏗️ An idle appender for `config`. The store is built from `config.store` at start.
    pub fn new(config: AppenderConfig) -> Self {
        let status = StatusReporter::new(config.status_capacity);
        Self {
            config,
            state: Mutex::new(AppenderState::Idle),
            lifecycle: Mutex::new(Lifecycle::default()),
            buffer: RwLock::new(None),
            status,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// 🏗️ Same, but with a store you built yourself. `config.store` is ignored.
    pub fn with_store(config: AppenderConfig, store: impl Into<StoreBackend>) -> Self {
        let appender = Self::new(config);
        appender.lifecycle.lock().store = Some(store.into());
        appender
    }

    pub fn config(&self) -> &AppenderConfig {
        &self.config
    }

    pub fn state(&self) -> AppenderState {
        *self.state.lock()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 📣 A receiver for status records. Drain it, or don't: a full channel sheds its
    /// oldest records and never blocks the pipeline.
    pub fn status(&self) -> StatusReceiver {
        self.status.subscribe()
    }

    /// 🚀 Idle → Running. Validates the config, builds the ring, connects to the store
    /// and probes it, then spawns the stages. Any failure leaves the appender `Failed`.
    pub fn start(&self) -> Result<(), StartError> {
        let mut lifecycle = self.lifecycle.lock();
        if self.state() != AppenderState::Idle {
            return Err(StartError::AlreadyStarted);
        }

        match self.launch(&mut lifecycle) {
            Ok(buffer) => {
                *self.buffer.write() = Some(buffer);
                *self.state.lock() = AppenderState::Running;
                info!(
                    capacity = self.config.buffer_capacity,
                    key = %self.config.store.list_key(),
                    "🚀 Appender started"
                );
                Ok(())
            }
            Err(err) => {
                *self.state.lock() = AppenderState::Failed;
                self.status
                    .error(StatusKind::StartFailure, format!("Appender failed to start: {err}"));
                Err(err)
            }
        }
    }

    fn launch(&self, lifecycle: &mut Lifecycle) -> Result<Arc<TransferBuffer<LogSlot>>, StartError> {
        self.config
            .validate()
            .map_err(|err| StartError::Config(format!("{err:#}")))?;
        let buffer = Arc::new(
            TransferBuffer::<LogSlot>::new(self.config.buffer_capacity, STAGE_COUNT)
                .map_err(|err| StartError::Config(err.to_string()))?,
        );
        let stage = |n| {
            buffer
                .stage(n)
                .map_err(|err| StartError::Spawn(err.to_string()))
        };

        // -- 🚽 flusher first: it owns the store, and the probe happens on its thread
        let store = lifecycle
            .store
            .take()
            .unwrap_or_else(|| StoreBackend::from_config(&self.config.store));
        let (ready_tx, ready_rx) = async_channel::bounded(1);
        let flusher = FlusherWorker::new(
            stage(FLUSHER_STAGE)?,
            store,
            self.config.store.list_key(),
            ready_tx,
            self.status.clone(),
            Arc::clone(&self.stats),
        )
        .start()
        .map_err(|err| StartError::Spawn(format!("{err:#}")))?;

        let verdict = match ready_rx.recv_blocking() {
            Ok(verdict) => verdict,
            Err(_) => Err(String::from("the flusher exited before reporting the probe result")),
        };
        if let Err(message) = verdict {
            buffer.close();
            join_stage(flusher, &self.status);
            return Err(StartError::Store(message));
        }

        let formatter = FormatterWorker::new(
            stage(FORMATTER_STAGE)?,
            self.config.format.clone(),
            self.status.clone(),
            Arc::clone(&self.stats),
        )
        .start();
        let formatter = match formatter {
            Ok(handle) => handle,
            Err(err) => {
                // -- 🧹 nothing was claimed yet, so the flusher drains immediately
                buffer.close();
                join_stage(flusher, &self.status);
                return Err(StartError::Spawn(format!("{err:#}")));
            }
        };

        lifecycle.stages = vec![formatter, flusher];
        Ok(buffer)
    }

    /// ✍️ Capture `event` on this thread and hand it to the pipeline.
    pub fn append<E: LoggingEvent>(&self, mut event: E) -> Result<(), AppendError> {
        event.prepare_for_deferred_processing();
        let caller = if self.config.format.include_caller_context {
            event.caller_location()
        } else {
            None
        };
        let mut raw = event.into_raw_event();
        raw.caller = caller;
        self.append_raw(raw)
    }

    /// ✍️ Hand an already captured event to the pipeline.
    pub fn append_raw(&self, event: RawEvent) -> Result<(), AppendError> {
        // -- 🔑 clone the handle and let go of the lock before a claim that may block
        let buffer = self.buffer.read().clone();
        let Some(buffer) = buffer else {
            return Err(self.reject());
        };

        match buffer.claim() {
            Ok(seq) => {
                buffer.write(
                    seq,
                    LogSlot {
                        event: Some(event),
                        document: None,
                    },
                );
                buffer.publish(seq);
                self.stats.appended();
                Ok(())
            }
            Err(_) => Err(self.reject()),
        }
    }

    fn reject(&self) -> AppendError {
        self.stats.rejected();
        match self.state() {
            AppenderState::Idle | AppenderState::Failed => AppendError::NotStarted,
            AppenderState::Running | AppenderState::Draining | AppenderState::Stopped => {
                self.status.warn(
                    StatusKind::PublishAfterShutdown,
                    "An event arrived after stop began and was not delivered.",
                );
                AppendError::PublishAfterShutdown
            }
        }
    }

    /// 🛑 Drain and shut down. Idempotent, safe on a never-started appender, and safe
    /// while other threads are still appending.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock();
        {
            let mut state = self.state.lock();
            match *state {
                AppenderState::Running => *state = AppenderState::Draining,
                AppenderState::Idle => {
                    *state = AppenderState::Stopped;
                    return;
                }
                AppenderState::Draining | AppenderState::Stopped | AppenderState::Failed => return,
            }
        }

        // -- 🚪 order matters: no new handle, then no new claims, then drain
        let buffer = self.buffer.write().take();
        if let Some(buffer) = buffer {
            let claimed = buffer.close();
            debug!(claimed, in_flight = buffer.in_flight(), "🚪 Ring closed, draining");
        }
        for stage in lifecycle.stages.drain(..) {
            join_stage(stage, &self.status);
        }

        *self.state.lock() = AppenderState::Stopped;
        let stats = self.stats.snapshot();
        info!(
            appended = stats.appended,
            pushed = stats.pushed_documents,
            dropped = stats.dropped_documents,
            "🛑 Appender stopped"
        );
    }
}

impl Drop for Appender {
    fn drop(&mut self) {
        self.stop();
    }
}

fn join_stage(stage: JoinHandle<Result<()>>, status: &StatusReporter) {
    let name = stage.thread().name().unwrap_or("stashx-stage").to_owned();
    match stage.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => status.error(StatusKind::StageFault, format!("{name} exited with an error: {err:#}")),
        Err(payload) => status.error(
            StatusKind::StageFault,
            format!("{name} panicked: {}", panic_message(payload.as_ref())),
        ),
    }
}
