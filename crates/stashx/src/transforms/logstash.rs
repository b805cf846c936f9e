//! 📡 The logstash document formatter.
//!
//! 🎬 *[an event walks in. a single line of JSON walks out. nobody saw the StringBuilder.]*
//!
//! The layout is fixed, because the parser on the other end of the redis list is:
//!
//! ```text
//! {"@source":"..","@tags":[..],"@fields":{..},"@timestamp":"..","@message":"..","@type":".."}
//! ```
//!
//! 🧠 Knowledge graph:
//! - `@source` is `type://host/file` (no `type://` when the type is empty). It only depends
//!   on config, so it is escaped once at construction and reused for every document.
//! - `@tags` is the marker (if any) followed by the `tags` context entry split on commas.
//!   No trimming. `"a,,b"` means three tags, one of them empty. The user asked for it.
//! - `@fields` is `stack_trace` (if any), the context in the event's own order, then
//!   `logger_name`, `thread_name` and `level`.
//! - `@type` goes through the escaper like everything else. It comes from config, but
//!   config files have quotes in them more often than anyone admits.

use anyhow::{Context, Result, anyhow};
use memchr::memchr_iter;
use tracing::warn;

use super::escape::escape_into;
use super::timestamp::TimestampFormatter;
use crate::app_config::FormatConfig;
use crate::common::RawEvent;

/// 📡 Turns [`RawEvent`]s into logstash JSON. One per stage thread: the timestamp cache
/// inside makes it `&mut self`.
#[derive(Debug)]
pub struct LogstashFormatter {
    /// already escaped
    source: String,
    /// already escaped
    type_tag: String,
    timestamps: TimestampFormatter,
}

impl LogstashFormatter {
    pub fn new(config: &FormatConfig) -> Self {
        let host = config
            .source_host
            .clone()
            .unwrap_or_else(discover_host_name);
        Self {
            source: build_source(&config.type_tag, &host, &config.source_file),
            type_tag: super::escape(&config.type_tag),
            timestamps: TimestampFormatter::new(),
        }
    }

    /// The cached, escaped `@source` value.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 🔄 One event in, one single-line JSON document out.
    pub fn format(&mut self, event: &RawEvent) -> Result<String> {
        let mut doc = String::with_capacity(256 + event.message.len());

        doc.push_str("{\"@source\":\"");
        doc.push_str(&self.source);
        doc.push_str("\",\"@tags\":[");
        append_tags(&mut doc, event);
        doc.push_str("],\"@fields\":{");
        append_fields(&mut doc, event);
        doc.push_str("},\"@timestamp\":\"");
        self.timestamps.format_into(event.timestamp_ms, &mut doc)?;
        doc.push_str("\",\"@message\":\"");
        escape_into(&event.message, &mut doc);
        doc.push_str("\",\"@type\":\"");
        doc.push_str(&self.type_tag);
        doc.push_str("\"}");

        Ok(doc)
    }
}

/// 🏷️ `type://host/file`, escaped. `file` falls back to `logback` when blank.
fn build_source(type_tag: &str, host: &str, file: &str) -> String {
    let file = if file.is_empty() { "logback" } else { file };
    let raw = if type_tag.is_empty() {
        format!("{host}/{file}")
    } else {
        format!("{type_tag}://{host}/{file}")
    };
    super::escape(&raw)
}

fn append_tags(doc: &mut String, event: &RawEvent) {
    let mut first = true;
    let mut push_tag = |doc: &mut String, tag: &str| {
        if !first {
            doc.push(',');
        }
        first = false;
        doc.push('"');
        escape_into(tag, doc);
        doc.push('"');
    };

    if let Some(marker) = &event.marker {
        push_tag(doc, marker.as_str());
    }
    if let Some(tags) = event.tags() {
        for tag in split_tags(tags) {
            push_tag(doc, tag);
        }
    }
}

/// ✂️ Split on every comma. Keeps empty segments, leading and trailing ones included.
fn split_tags(tags: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for comma in memchr_iter(b',', tags.as_bytes()) {
        parts.push(&tags[start..comma]);
        start = comma + 1;
    }
    parts.push(&tags[start..]);
    parts
}

fn append_fields(doc: &mut String, event: &RawEvent) {
    // -- 💥 the things we don't always have go first
    if let Some(stack_trace) = &event.exception {
        append_field(doc, "stack_trace", stack_trace);
        doc.push(',');
    }
    for (key, value) in &event.context {
        append_field(doc, key, value);
        doc.push(',');
    }

    // -- ✅ the things we always have
    append_field(doc, "logger_name", &event.logger_name);
    doc.push(',');
    append_field(doc, "thread_name", &event.thread_name);
    doc.push(',');
    append_field(doc, "level", event.level.as_str());
}

fn append_field(doc: &mut String, name: &str, value: &str) {
    doc.push('"');
    escape_into(name, doc);
    doc.push_str("\":\"");
    escape_into(value, doc);
    doc.push('"');
}

/// 🔍 Best-effort host name for `@source`: `$HOSTNAME`, then the OS's `gethostname`,
/// then `localhost`. Set `source_host` in config if none of those are what you want.
pub(crate) fn discover_host_name() -> String {
    if let Some(name) = std::env::var("HOSTNAME")
        .ok()
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
    {
        return name;
    }

    match system_host_name() {
        Ok(name) if !name.trim().is_empty() => return name.trim().to_owned(),
        Ok(_) => warn!("⚠️ The OS reported an empty host name"),
        Err(err) => warn!("⚠️ Failed to get the system host name: {err:#}"),
    }
    warn!("⚠️ Could not determine the host name, @source will say 'localhost'");
    String::from("localhost")
}

#[cfg(unix)]
fn system_host_name() -> Result<String> {
    let name = nix::unistd::gethostname().context("💀 gethostname(2) failed")?;
    name.into_string()
        .map_err(|raw| anyhow!("💀 The host name {raw:?} is not valid UTF-8"))
}

#[cfg(not(unix))]
fn system_host_name() -> Result<String> {
    std::env::var("COMPUTERNAME").context("💀 COMPUTERNAME is not set")
}
