//! 🔄 Transforms: from a [`RawEvent`] to the exact bytes logstash expects.
//!
//! 🧠 Knowledge graph:
//! - [`escape`]: the JSON string escaper. Pure. Used by everything below it.
//! - [`timestamp`]: ISO-8601 millisecond timestamps, one formatter per stage thread.
//! - [`logstash`]: the document formatter. `@source`, `@tags`, `@fields`, `@timestamp`,
//!   `@message`, `@type`. In that order. Always. Downstream parsers are creatures of habit.
//!
//! [`RawEvent`]: crate::common::RawEvent

pub mod escape;
pub mod logstash;
pub mod timestamp;

pub use escape::{escape, escape_into};
pub use logstash::LogstashFormatter;
pub use timestamp::TimestampFormatter;
