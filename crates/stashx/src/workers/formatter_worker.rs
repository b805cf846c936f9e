//! 🎬 *[an event lands in a slot. a document leaves it. the slot does not notice.]*
//!
//! 🔄 The FormatterWorker: stage 0. Walks the ring in sequence order, turns each event
//! into a logstash document in place, and hands the slot to the flusher.
//!
//! ⚠️ One bad event must not stop the line. Format errors and panics are caught per
//! item, reported, and the slot moves on without a document.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use anyhow::{Context, Result};
use tracing::debug;

use super::{LogSlot, Worker, panic_message};
use crate::app_config::FormatConfig;
use crate::ring::{Available, Sequence, StageCursor};
use crate::stats::PipelineStats;
use crate::status::{StatusKind, StatusReporter};
use crate::transforms::LogstashFormatter;

#[derive(Debug)]
pub(crate) struct FormatterWorker {
    cursor: StageCursor<LogSlot>,
    config: FormatConfig,
    formatter: LogstashFormatter,
    status: StatusReporter,
    stats: Arc<PipelineStats>,
}

impl FormatterWorker {
    pub(crate) fn new(
        cursor: StageCursor<LogSlot>,
        config: FormatConfig,
        status: StatusReporter,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let formatter = LogstashFormatter::new(&config);
        Self {
            cursor,
            config,
            formatter,
            status,
            stats,
        }
    }

    fn run(mut self) -> Result<()> {
        debug!(source = %self.formatter.source(), "🔄 Formatter stage started");
        let mut next: Sequence = 0;
        loop {
            match self.cursor.wait_for(next) {
                Available::UpTo(end) => {
                    for seq in next..=end {
                        self.format_slot(seq);
                    }
                    self.cursor.advance(end);
                    next = end + 1;
                }
                Available::Drained => {
                    debug!(formatted = next, "🏁 Formatter stage drained. Shutting down.");
                    return Ok(());
                }
            }
        }
    }

    fn format_slot(&mut self, seq: Sequence) {
        let Some(event) = self.cursor.read(seq, |slot| slot.event.take()) else {
            self.status.error(
                StatusKind::StageFault,
                format!("Slot {seq} reached the formatter without an event."),
            );
            return;
        };

        let formatter = &mut self.formatter;
        match catch_unwind(AssertUnwindSafe(|| formatter.format(&event))) {
            Ok(Ok(document)) => {
                self.cursor.read(seq, |slot| slot.document = Some(document));
                self.stats.formatted();
            }
            Ok(Err(err)) => {
                self.stats.format_failed();
                self.status.warn(
                    StatusKind::FormatFailure,
                    format!(
                        "Skipped an event from '{}' that could not be formatted: {err:#}",
                        event.logger_name
                    ),
                );
            }
            Err(payload) => {
                self.stats.format_failed();
                self.status.error(
                    StatusKind::StageFault,
                    format!(
                        "Formatting an event from '{}' panicked: {}",
                        event.logger_name,
                        panic_message(payload.as_ref())
                    ),
                );
                // -- 🧽 whatever state the panic left behind goes in the bin
                self.formatter = LogstashFormatter::new(&self.config);
            }
        }
    }
}

impl Worker for FormatterWorker {
    fn start(self) -> Result<JoinHandle<Result<()>>> {
        Builder::new()
            .name("stashx-formatter".into())
            .spawn(move || self.run())
            .context("💀 Failed to spawn the formatter thread. The OS said no.")
    }
}
