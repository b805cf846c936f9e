//! 🔌 `tracing` glue: a [`Layer`] that feeds every event into an [`Appender`].
//!
//! - the event's target becomes the logger name
//! - the `message` field becomes the message
//! - a `marker` field becomes the marker, an `exception` field the stack trace
//! - every other field lands in the context, in the order it was recorded
//!
//! 🕳️ Events that arrive before `start` (or after a failed one) are counted as rejected
//! in [`Appender::stats`] and dropped, with a `trace!` under the `stashx::layer` target.
//! Events that race `stop` are reported on the status channel as well.
//!
//! ⚠️ Events from stashx's own modules, and anything emitted on a `stashx-*` thread, are
//! skipped. An appender that logs into itself is an appender that never stops logging.

use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber, trace};
use tracing_subscriber::layer::{Context, Layer};

use crate::appender::{AppendError, Appender};
use crate::common::{CallerLocation, Level, RawEvent};

/// 🔌 Install with `tracing_subscriber::registry().with(StashLayer::new(appender))`.
#[derive(Debug, Clone)]
pub struct StashLayer {
    appender: Arc<Appender>,
}

impl StashLayer {
    pub fn new(appender: Arc<Appender>) -> Self {
        Self { appender }
    }
}

impl<S: Subscriber> Layer<S> for StashLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if is_own_target(metadata.target()) || on_own_thread() {
            return;
        }

        let mut fields = FieldVisitor::default();
        event.record(&mut fields);

        let mut raw = RawEvent::new(Level::from(metadata.level()), metadata.target(), fields.message);
        raw.marker = fields.marker;
        raw.exception = fields.exception;
        for (key, value) in fields.context {
            raw.insert_context(key, value);
        }
        if self.appender.config().format.include_caller_context {
            raw.caller = Some(CallerLocation {
                file: metadata.file().map(str::to_owned),
                line: metadata.line(),
                module: metadata.module_path().map(str::to_owned),
            });
        }

        // -- 🤐 the host's logging call carries on regardless
        match self.appender.append_raw(raw) {
            Ok(()) => {}
            Err(AppendError::NotStarted) => {
                trace!(logger = metadata.target(), "🕳️ Appender not running, event dropped");
            }
            // -- 📣 already on the status channel
            Err(AppendError::PublishAfterShutdown) => {}
        }
    }
}

fn is_own_target(target: &str) -> bool {
    target == "stashx" || target.starts_with("stashx::")
}

fn on_own_thread() -> bool {
    std::thread::current()
        .name()
        .is_some_and(|name| name.starts_with("stashx-"))
}

#[derive(Debug, Default)]
struct FieldVisitor {
    message: String,
    marker: Option<String>,
    exception: Option<String>,
    context: Vec<(String, String)>,
}

impl FieldVisitor {
    fn put(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "marker" => self.marker = Some(value),
            "exception" => self.exception = Some(value),
            name => self.context.push((name.to_owned(), value)),
        }
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_config::{AppenderConfig, StoreConfig};
    use crate::appender::AppenderState;
    use crate::backends::InMemoryStore;
    use serde_json::Value;
    use tracing_subscriber::layer::SubscriberExt;

    fn appender() -> (Arc<Appender>, InMemoryStore) {
        let store = InMemoryStore::new();
        let appender = Arc::new(Appender::with_store(
            AppenderConfig {
                buffer_capacity: 16,
                store: StoreConfig::InMemory,
                ..AppenderConfig::default()
            },
            store.clone(),
        ));
        appender.start().expect("💀 in-memory appender should start");
        (appender, store)
    }

    #[test]
    fn the_one_where_a_tracing_event_becomes_a_document() {
        let (appender, store) = appender();
        let subscriber = tracing_subscriber::registry().with(StashLayer::new(Arc::clone(&appender)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "svc.core", user = "alice", attempt = 3, marker = "AUDIT", "hello {}", "world");
            tracing::info!(target: "stashx::ring", "🙈 our own chatter stays out");
        });
        appender.stop();

        let docs = store.list("logstash");
        assert_eq!(docs.len(), 1, "only the host's event is appended: {docs:?}");
        let parsed: Value = serde_json::from_str(&docs[0]).expect("json");
        assert_eq!(parsed["@message"], "hello world");
        assert_eq!(parsed["@tags"], serde_json::json!(["AUDIT"]));
        assert_eq!(parsed["@fields"]["user"], "alice");
        assert_eq!(parsed["@fields"]["attempt"], "3");
        assert_eq!(parsed["@fields"]["logger_name"], "svc.core");
        assert_eq!(parsed["@fields"]["level"], "WARN");
    }

    #[test]
    fn the_one_where_stashx_threads_are_not_heard() {
        let (appender, store) = appender();
        let dispatch = tracing::Dispatch::new(
            tracing_subscriber::registry().with(StashLayer::new(Arc::clone(&appender))),
        );

        std::thread::Builder::new()
            .name("stashx-lookalike".into())
            .spawn(move || {
                tracing::dispatcher::with_default(&dispatch, || {
                    tracing::info!(target: "svc", "from a stashx thread");
                })
            })
            .expect("spawn")
            .join()
            .expect("thread panicked");
        appender.stop();

        assert!(store.list("logstash").is_empty());
    }

    #[test]
    fn the_one_where_events_before_start_are_counted_and_dropped() {
        let store = InMemoryStore::new();
        let appender = Arc::new(Appender::with_store(
            AppenderConfig {
                buffer_capacity: 16,
                store: StoreConfig::InMemory,
                ..AppenderConfig::default()
            },
            store.clone(),
        ));
        let subscriber = tracing_subscriber::registry().with(StashLayer::new(Arc::clone(&appender)));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "svc", "too early");
            tracing::info!(target: "svc", "still too early");
        });

        let stats = appender.stats();
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.appended, 0);
        assert_eq!(appender.state(), AppenderState::Idle);
        assert!(
            appender.status().try_recv().is_err(),
            "an idle appender has nothing to say on the status channel"
        );
        assert!(store.pushes().is_empty());
    }

    #[test]
    fn the_one_where_own_targets_are_matched_exactly() {
        assert!(is_own_target("stashx"));
        assert!(is_own_target("stashx::appender"));
        assert!(!is_own_target("stashx_cli"));
        assert!(!is_own_target("svc"));
    }
}
