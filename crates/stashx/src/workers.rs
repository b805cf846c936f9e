// This is pretty much across the whole world of stashx
// anyhowwwww.... it's useful!
use std::thread::JoinHandle;

use anyhow::Result;

use crate::common::RawEvent;

mod flusher_worker;
mod formatter_worker;

pub(crate) use flusher_worker::FlusherWorker;
pub(crate) use formatter_worker::FormatterWorker;

/// 🎡 Stage numbers on the transfer buffer. The flusher trails the formatter.
pub(crate) const FORMATTER_STAGE: usize = 0;
pub(crate) const FLUSHER_STAGE: usize = 1;
pub(crate) const STAGE_COUNT: usize = 2;

/// 📦 What every ring slot holds. A producer fills `event`, the formatter swaps it for
/// a `document`, the flusher takes the `document`. Between cycles both are `None`.
#[derive(Debug, Default)]
pub(crate) struct LogSlot {
    pub(crate) event: Option<RawEvent>,
    pub(crate) document: Option<String>,
}

// A background worker, that does work. duh.
// Each one gets its own named OS thread, so spawning can fail.
pub(crate) trait Worker {
    fn start(self) -> Result<JoinHandle<Result<()>>>;
}

/// 💥 Best-effort text out of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("a panic with no message")
    }
}
