//! 🚀 stashx-cli: pipe lines in, watch them land on a redis list.
//!
//! 🎬 *[narrator voice]* "It all started with `tail -f app.log | stashx-cli`..."
//! 📦 A thin wrapper: load config, start an appender, feed it every input line,
//! stop it, and print what happened. The library does the heavy lifting. 🦆

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use stashx::backends::InMemoryStore;
use stashx::{Appender, Level, RawEvent, StoreConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod summary;

/// 📮 Push log lines onto a redis list as logstash JSON documents.
#[derive(Debug, Parser)]
#[command(name = "stashx", version, about)]
struct Args {
    /// TOML config file. `STASHX_*` environment variables are read either way.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read lines from this file instead of stdin.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Every line is a JSON event object instead of a plain message.
    #[arg(long)]
    json: bool,

    /// Logger name for plain lines, and for JSON lines that don't name one.
    #[arg(long, default_value = "stashx-cli")]
    logger: String,

    /// Level for plain lines, and for JSON lines that don't carry one.
    #[arg(long, default_value = "INFO")]
    level: Level,

    /// Keep everything in memory and print the documents instead of pushing them.
    #[arg(long)]
    dry_run: bool,
}

/// 📄 One `--json` input line. Only `message` is required.
#[derive(Debug, Deserialize)]
struct InputLine {
    message: String,
    #[serde(default)]
    level: Option<String>,
    #[serde(default)]
    logger: Option<String>,
    #[serde(default)]
    thread: Option<String>,
    #[serde(default)]
    timestamp_ms: Option<i64>,
    #[serde(default)]
    marker: Option<String>,
    #[serde(default)]
    exception: Option<String>,
    #[serde(default)]
    tags: Option<String>,
    #[serde(default)]
    context: BTreeMap<String, String>,
}

impl InputLine {
    fn into_event(self, args: &Args) -> Result<RawEvent> {
        let level = match self.level.as_deref() {
            Some(level) => level.parse()?,
            None => args.level,
        };
        let mut event = RawEvent::new(level, self.logger.as_deref().unwrap_or(&args.logger), self.message);
        if let Some(thread) = self.thread {
            event = event.with_thread_name(thread);
        }
        if let Some(timestamp_ms) = self.timestamp_ms {
            event = event.with_timestamp_ms(timestamp_ms);
        }
        event.marker = self.marker;
        event.exception = self.exception;
        for (key, value) in self.context {
            event.insert_context(key, value);
        }
        if let Some(tags) = self.tags {
            event = event.with_tags(tags);
        }
        Ok(event)
    }
}

/// 🚀 main(): init tracing, parse args, run, and if it goes sideways, say why.
fn main() {
    // 📡 logs go to stderr so `--dry-run` output on stdout stays pipeable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("Could not connect to redis")
                || cause_str.contains("Connection refused")
                || cause_str.contains("connection refused")
                || cause_str.contains("Timed out connecting")
                || cause_str.contains("store is unreachable")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like redis isn't reachable. Check `[store.Redis]` host and port, \
                or STASHX_STORE__REDIS__HOST / STASHX_STORE__REDIS__PORT. If you're using Docker, \
                try `docker ps` to see what's up, or `docker run -p 6379:6379 redis` to summon one. \
                Or pass --dry-run to see the documents without a redis at all. ☕"
            );
        }

        // 🗑️ Exit with prejudice.
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = stashx::load_config(args.config.as_deref())
        .context("💀 Couldn't load the configuration. Check the file and any STASHX_* variables.")?;

    let dry_run_store = if args.dry_run {
        config.store = StoreConfig::InMemory;
        Some(InMemoryStore::new())
    } else {
        None
    };
    let key = config.store.list_key();
    let appender = match &dry_run_store {
        Some(store) => Appender::with_store(config, store.clone()),
        None => Appender::new(config),
    };
    appender.start().context("💀 The appender refused to start.")?;
    info!(key = %key, dry_run = args.dry_run, "🚀 Appender running, reading input");

    let started = Instant::now();
    let input: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(File::open(path).with_context(|| {
            format!("💀 Couldn't open input file '{}'.", path.display())
        })?)),
        None => Box::new(std::io::stdin().lock()),
    };

    let mut skipped = 0u64;
    for (index, line) in input.lines().enumerate() {
        let line = line.context("💀 Failed to read a line of input.")?;
        if line.trim().is_empty() {
            continue;
        }

        let event = if args.json {
            let parsed = serde_json::from_str::<InputLine>(&line)
                .context("not a JSON event object")
                .and_then(|input| input.into_event(&args));
            match parsed {
                Ok(event) => event,
                Err(err) => {
                    warn!(line = index + 1, "⚠️ Skipping a line: {err:#}");
                    skipped += 1;
                    continue;
                }
            }
        } else {
            RawEvent::new(args.level, args.logger.as_str(), line)
        };

        appender
            .append_raw(event)
            .with_context(|| format!("💀 Line {} could not be appended.", index + 1))?;
    }

    appender.stop();
    let stats = appender.stats();

    if let Some(store) = dry_run_store {
        for document in store.list(&key) {
            println!("{document}");
        }
    }
    eprintln!("{}", summary::render(&stats, skipped, started.elapsed()));

    if stats.failed_pushes > 0 {
        bail!(
            "💀 {} of {} documents were dropped after failed pushes.",
            stats.dropped_documents,
            stats.appended
        );
    }
    Ok(())
}
