//! 📮 stashx: log events in, logstash JSON out, RPUSHed onto a redis list.
//!
//! 🎬 *[a thousand threads call `info!` at once. none of them wait for redis.]*
//! *[somewhere behind the curtain, two worker threads do all the actual work.]*
//!
//! 🧠 Knowledge graph:
//! - [`Appender`] is the front door. `start`, `append`, `stop`. That's the whole API surface.
//! - [`ring::TransferBuffer`] is the bounded multi-producer ring the callers publish into.
//! - Two chained stage workers drain it: the formatter turns each [`RawEvent`] into a
//!   JSON document in place, the flusher batches documents and pushes them on end-of-batch.
//! - [`backends::Store`] is where batches land: redis for real, in-memory for tests.
//! - [`layer::StashLayer`] plugs the whole thing into a `tracing` subscriber.
//!
//! 🦆 The duck has read the README. The duck has opinions about logstash. The duck is ignored.

pub mod app_config;
pub mod appender;
pub mod backends;
pub mod common;
mod flush_client;
pub mod layer;
pub mod ring;
pub mod stats;
pub mod status;
pub mod transforms;
mod workers;

pub use app_config::{AppenderConfig, FormatConfig, RedisStoreConfig, StoreConfig, load_config};
pub use appender::{AppendError, Appender, AppenderState, StartError};
pub use common::{CallerLocation, Level, LoggingEvent, RawEvent};
pub use layer::StashLayer;
pub use stats::StatsSnapshot;
pub use status::{Status, StatusKind, StatusReceiver};
