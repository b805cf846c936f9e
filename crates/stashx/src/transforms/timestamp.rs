//! 🕰️ `@timestamp` rendering: `YYYY-MM-DDTHH:MM:SS.mmmZ`, always UTC.
//!
//! A [`TimestampFormatter`] caches the formatted second, so a burst of events in the same
//! second only pays for the calendar math once. That cache makes it stateful, so it takes
//! `&mut self` and each stage thread owns its own. No sharing. No locks. No drama.

use std::fmt::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
pub struct TimestampFormatter {
    cached_second: Option<i64>,
    /// `YYYY-MM-DDTHH:MM:SS` for `cached_second`
    prefix: String,
}

impl TimestampFormatter {
    pub fn new() -> Self {
        Self::default()
    }

    /// ✍️ Append the rendering of `timestamp_ms` (ms since the epoch) onto `out`.
    pub fn format_into(&mut self, timestamp_ms: i64, out: &mut String) -> Result<()> {
        let second = timestamp_ms.div_euclid(1000);
        let millis = timestamp_ms.rem_euclid(1000);

        if self.cached_second != Some(second) {
            let instant: DateTime<Utc> = DateTime::from_timestamp(second, 0).with_context(|| {
                format!("💀 Timestamp {timestamp_ms}ms is outside the calendar chrono is willing to draw.")
            })?;
            self.prefix.clear();
            write!(self.prefix, "{}", instant.format("%Y-%m-%dT%H:%M:%S"))
                .context("💀 Failed to render a calendar date. The calendar won.")?;
            self.cached_second = Some(second);
        }

        out.push_str(&self.prefix);
        write!(out, ".{millis:03}Z").context("💀 Failed to render milliseconds.")?;
        Ok(())
    }

    pub fn format(&mut self, timestamp_ms: i64) -> Result<String> {
        let mut out = String::with_capacity(24);
        self.format_into(timestamp_ms, &mut out)?;
        Ok(out)
    }
}
