//! 📦 Common data structures: the things that ride the ring.
//!
//! A [`RawEvent`] is one log line, captured on the caller's thread and owned by the
//! pipeline from the moment it is published. [`LoggingEvent`] is the accessor surface a
//! host logging framework implements so the appender can capture its events.
//!
//! ⚠️ Nothing in here is allowed to be lazy. By the time an event crosses into the ring,
//! every field is a plain owned value. Whatever the host defers, it resolves before that.

use std::fmt;
use std::str::FromStr;

use anyhow::bail;

/// 🎚️ Severity of a log line. Rendered upper-case in the `level` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            // -- 💀 "CRITICAL"? "FATAL"? "VIBES"? we don't do those here
            other => bail!("💀 Unknown log level '{other}'. Try TRACE, DEBUG, INFO, WARN or ERROR."),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// 📍 Where in the source the log call happened. Only captured when the appender is
/// configured with `include_caller_context`, because finding out is not free.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallerLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub module: Option<String>,
}

/// 📦 One log line, fully materialized.
///
/// `context` is ordered and its keys are unique: [`RawEvent::with_context`] replaces an
/// existing key in place instead of appending a duplicate. A comma-separated `tags`
/// entry in the context is what ends up in `@tags`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawEvent {
    /// 🕰️ milliseconds since the Unix epoch, UTC
    pub timestamp_ms: i64,
    pub level: Level,
    pub logger_name: String,
    pub thread_name: String,
    pub message: String,
    pub marker: Option<String>,
    /// 💥 already-rendered stack trace text
    pub exception: Option<String>,
    pub context: Vec<(String, String)>,
    pub caller: Option<CallerLocation>,
}

impl RawEvent {
    /// 🚀 A fresh event stamped with the current time and the current thread's name.
    pub fn new(level: Level, logger_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            level,
            logger_name: logger_name.into(),
            thread_name: current_thread_name(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_timestamp_ms(mut self, timestamp_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }

    /// 🔑 Set a context entry. Existing keys keep their position and get the new value.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_context(key.into(), value.into());
        self
    }

    pub fn with_tags(self, tags: impl Into<String>) -> Self {
        self.with_context("tags", tags)
    }

    pub fn insert_context(&mut self, key: String, value: String) {
        match self.context.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.context.push((key, value)),
        }
    }

    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    /// 🏷️ The raw, unsplit `tags` context entry.
    pub fn tags(&self) -> Option<&str> {
        self.context_value("tags")
    }
}

/// 🔌 What a host logging framework must expose for its events to be appended.
///
/// The appender calls [`LoggingEvent::prepare_for_deferred_processing`] (and, when
/// caller context is enabled, [`LoggingEvent::caller_location`]) on the caller's thread,
/// then converts the event into a [`RawEvent`] before it ever touches the ring.
pub trait LoggingEvent {
    fn timestamp_ms(&self) -> i64;
    fn level(&self) -> Level;
    fn logger_name(&self) -> &str;
    fn thread_name(&self) -> &str;
    fn formatted_message(&self) -> &str;
    fn marker(&self) -> Option<&str>;
    fn exception(&self) -> Option<&str>;
    fn context(&self) -> &[(String, String)];

    /// 📍 Resolve the call site. Hosts that can't, don't.
    fn caller_location(&mut self) -> Option<CallerLocation> {
        None
    }

    /// 🧊 Force every lazily computed field to resolve now, on this thread.
    fn prepare_for_deferred_processing(&mut self) {}

    /// 📦 Capture into an owned [`RawEvent`]. The default copies through the accessors.
    fn into_raw_event(self) -> RawEvent
    where
        Self: Sized,
    {
        RawEvent {
            timestamp_ms: self.timestamp_ms(),
            level: self.level(),
            logger_name: self.logger_name().to_owned(),
            thread_name: self.thread_name().to_owned(),
            message: self.formatted_message().to_owned(),
            marker: self.marker().map(str::to_owned),
            exception: self.exception().map(str::to_owned),
            context: self.context().to_vec(),
            caller: None,
        }
    }
}

impl LoggingEvent for RawEvent {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    fn level(&self) -> Level {
        self.level
    }

    fn logger_name(&self) -> &str {
        &self.logger_name
    }

    fn thread_name(&self) -> &str {
        &self.thread_name
    }

    fn formatted_message(&self) -> &str {
        &self.message
    }

    fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    fn exception(&self) -> Option<&str> {
        self.exception.as_deref()
    }

    fn context(&self) -> &[(String, String)] {
        &self.context
    }

    fn caller_location(&mut self) -> Option<CallerLocation> {
        self.caller.clone()
    }

    // -- ✅ already owned. no copying, just a move. the cheapest conversion in the crate.
    fn into_raw_event(self) -> RawEvent {
        self
    }
}

/// 🧵 The current thread's name, or its id when it never got one.
pub(crate) fn current_thread_name() -> String {
    let current = std::thread::current();
    match current.name() {
        Some(name) => name.to_owned(),
        None => format!("{:?}", current.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_context_keys_stay_unique_and_keep_their_seat() {
        let event = RawEvent::new(Level::Info, "svc", "hi")
            .with_context("user", "alice")
            .with_context("request", "r-1")
            .with_context("user", "bob");

        assert_eq!(
            event.context,
            vec![
                ("user".to_string(), "bob".to_string()),
                ("request".to_string(), "r-1".to_string()),
            ]
        );
    }

    #[test]
    fn the_one_where_tags_live_in_the_context() {
        let event = RawEvent::new(Level::Warn, "svc", "hi").with_tags("a,b");
        assert_eq!(event.tags(), Some("a,b"));
        assert_eq!(event.context_value("tags"), Some("a,b"));
    }

    #[test]
    fn the_one_where_levels_parse_from_whatever_humans_type() -> anyhow::Result<()> {
        assert_eq!("info".parse::<Level>()?, Level::Info);
        assert_eq!(" Warning ".parse::<Level>()?, Level::Warn);
        assert_eq!("ERROR".parse::<Level>()?, Level::Error);
        assert!("vibes".parse::<Level>().is_err());
        Ok(())
    }

    #[test]
    fn the_one_where_tracing_levels_map_one_to_one() {
        assert_eq!(Level::from(&tracing::Level::TRACE), Level::Trace);
        assert_eq!(Level::from(&tracing::Level::ERROR), Level::Error);
        assert_eq!(Level::Debug.to_string(), "DEBUG");
    }

    #[test]
    fn the_one_where_a_raw_event_converts_into_itself() {
        let event = RawEvent::new(Level::Info, "svc", "hi").with_marker("m");
        let again = event.clone().into_raw_event();
        assert_eq!(event, again);
    }
}
