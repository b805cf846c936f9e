//! 📣 Status reporting: the appender's side channel for things that went wrong off the
//! caller's thread.
//!
//! Every report goes two places: a `tracing` event, and a [`Status`] record on a bounded
//! channel the host may drain through [`crate::Appender::status`]. The channel never
//! blocks the reporter. When it is full, the oldest record makes room for the newest.
//!
//! ⚠️ The appender's own threads are excluded by [`crate::StashLayer`], so these
//! `tracing` events never loop back into the ring.

use std::fmt;

use async_channel::{Receiver, Sender, TrySendError};
use tracing::{error, warn};

/// 🏷️ What kind of trouble this was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// an event could not be turned into a document, and was skipped
    FormatFailure,
    /// a batch could not be pushed, and was dropped
    PushFailure,
    /// a stage thread hit something it did not expect
    StageFault,
    /// a producer tried to append after stop began
    PublishAfterShutdown,
    /// start did not make it to Running
    StartFailure,
}

impl fmt::Display for StatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusKind::FormatFailure => "format failure",
            StatusKind::PushFailure => "push failure",
            StatusKind::StageFault => "stage fault",
            StatusKind::PublishAfterShutdown => "publish after shutdown",
            StatusKind::StartFailure => "start failure",
        };
        f.write_str(name)
    }
}

/// 📋 One status record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub kind: StatusKind,
    pub message: String,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// 📬 What [`crate::Appender::status`] hands out.
pub type StatusReceiver = Receiver<Status>;

/// 📣 Cloneable reporting handle shared by the appender and its stages.
#[derive(Debug, Clone)]
pub(crate) struct StatusReporter {
    tx: Sender<Status>,
    // -- 🧹 kept so the channel never closes and so a full channel can shed its oldest record
    rx: Receiver<Status>,
}

impl StatusReporter {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = async_channel::bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// A receiver for the host. Every receiver competes for the same records.
    pub(crate) fn subscribe(&self) -> StatusReceiver {
        self.rx.clone()
    }

    pub(crate) fn warn(&self, kind: StatusKind, message: impl Into<String>) {
        let message = message.into();
        warn!(kind = %kind, "⚠️ {message}");
        self.record(Status { kind, message });
    }

    pub(crate) fn error(&self, kind: StatusKind, message: impl Into<String>) {
        let message = message.into();
        error!(kind = %kind, "💀 {message}");
        self.record(Status { kind, message });
    }

    fn record(&self, status: Status) {
        let mut status = status;
        // -- 🔁 two tries: shed the oldest record once, then give up on this one
        for _ in 0..2 {
            match self.tx.try_send(status) {
                Ok(()) => return,
                Err(TrySendError::Full(rejected)) => {
                    let _ = self.rx.try_recv();
                    status = rejected;
                }
                Err(TrySendError::Closed(_)) => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_records_arrive_in_report_order() {
        let reporter = StatusReporter::new(8);
        let rx = reporter.subscribe();
        reporter.warn(StatusKind::FormatFailure, "first");
        reporter.error(StatusKind::PushFailure, "second");

        let first = rx.try_recv().expect("first record");
        assert_eq!(first.kind, StatusKind::FormatFailure);
        assert_eq!(first.message, "first");
        assert_eq!(rx.try_recv().expect("second record").to_string(), "push failure: second");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn the_one_where_a_full_channel_forgets_the_oldest_news() {
        let reporter = StatusReporter::new(2);
        let rx = reporter.subscribe();
        for n in 0..5 {
            reporter.warn(StatusKind::PushFailure, format!("failure {n}"));
        }

        let kept: Vec<String> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|status| status.message)
            .collect();
        assert_eq!(kept, vec!["failure 3", "failure 4"]);
    }
}
