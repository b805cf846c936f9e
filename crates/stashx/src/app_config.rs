//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of
//! self-harm that even the borrow checker wouldn't approve of.
//!
//! 🧠 Knowledge graph:
//! - [`AppenderConfig`] is everything the appender needs, handed over by value at
//!   construction. No setters. Config is frozen the moment the appender owns it.
//! - [`StoreConfig`] picks the store backend, same trick as the sink configs of old:
//!   an externally tagged enum, so TOML says `[store.Redis]` or `store = "InMemory"`.
//! - Env vars are `STASHX_*`, nested with `__`: `STASHX_STORE__REDIS__PORT=6380`.

use std::path::Path;

use anyhow::{Context, bail, ensure};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

/// 📦 The AppenderConfig: one struct to rule them all, one struct to find them,
/// one struct to bring them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone)]
pub struct AppenderConfig {
    /// 🎡 Ring slots. Power of two, because masks are cheaper than modulo.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub format: FormatConfig,
    /// 📣 How many undrained status records the host can fall behind on before the
    /// oldest start falling off.
    #[serde(default = "default_status_capacity")]
    pub status_capacity: usize,
}

// 🎡 1024 slots. Enough for a burst, small enough that a stuck redis is noticed quickly.
fn default_buffer_capacity() -> usize {
    1024
}

fn default_status_capacity() -> usize {
    256
}

impl Default for AppenderConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            store: StoreConfig::default(),
            format: FormatConfig::default(),
            status_capacity: default_status_capacity(),
        }
    }
}

impl AppenderConfig {
    /// 🔒 Reject configs that would only blow up later, on some other thread.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.buffer_capacity > 0 && self.buffer_capacity.is_power_of_two(),
            "💀 buffer_capacity must be a non-zero power of two, got {}. Try 1024. Everybody likes 1024.",
            self.buffer_capacity
        );
        ensure!(
            self.status_capacity > 0,
            "💀 status_capacity must be at least 1. Zero is a strong opinion, not a capacity."
        );
        if let StoreConfig::Redis(redis) = &self.store {
            redis.validate()?;
        }
        Ok(())
    }
}

/// 🎭 Which store the batches land in.
#[derive(Debug, Deserialize, Clone)]
pub enum StoreConfig {
    Redis(RedisStoreConfig),
    /// 🧪 Keeps everything in RAM. For tests and dry runs.
    InMemory,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Redis(RedisStoreConfig::default())
    }
}

impl StoreConfig {
    /// 📦 The list every batch is appended to. The in-memory store borrows redis' default.
    pub fn list_key(&self) -> String {
        match self {
            StoreConfig::Redis(redis) => redis.key.clone(),
            StoreConfig::InMemory => default_redis_key(),
        }
    }
}

/// 📡 Where redis lives and which list gets the documents.
#[derive(Debug, Deserialize, Clone)]
pub struct RedisStoreConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    /// ⏱️ Applies to connecting and to every single command.
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
    /// 🔒 Sent with AUTH on every new connection. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub database: u32,
    /// 📦 The list everything gets RPUSHed onto.
    #[serde(default = "default_redis_key")]
    pub key: String,
}

fn default_redis_host() -> String {
    String::from("127.0.0.1")
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

// -- 📦 what the logstash redis input listens on out of the box
fn default_redis_key() -> String {
    String::from("logstash")
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            timeout_ms: default_redis_timeout_ms(),
            password: None,
            database: 0,
            key: default_redis_key(),
        }
    }
}

impl RedisStoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.key.is_empty() {
            bail!("💀 The redis key cannot be empty. RPUSH onto nothing is not a strategy.");
        }
        ensure!(!self.host.is_empty(), "💀 The redis host cannot be empty.");
        ensure!(self.port != 0, "💀 Port 0 is where packets go to die. Pick a real redis port.");
        ensure!(
            self.timeout_ms > 0,
            "💀 timeout_ms must be positive. A zero timeout times out before it starts."
        );
        Ok(())
    }
}

/// 🏷️ What goes into `@source` and `@type`.
#[derive(Debug, Deserialize, Clone)]
pub struct FormatConfig {
    /// 🏷️ `@type`, and the scheme of `@source` when non-empty.
    #[serde(default)]
    pub type_tag: String,
    /// 🖥️ Host part of `@source`. Discovered when not set.
    #[serde(default)]
    pub source_host: Option<String>,
    /// 📄 Path part of `@source`.
    #[serde(default = "default_source_file")]
    pub source_file: String,
    /// 📍 Resolve call sites on the caller's thread before publishing.
    #[serde(default)]
    pub include_caller_context: bool,
}

fn default_source_file() -> String {
    String::from("logback")
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            type_tag: String::new(),
            source_host: None,
            source_file: default_source_file(),
            include_caller_context: false,
        }
    }
}

/// 🚀 Load the config, from a file, from env vars, or from the sheer power of hoping.
///
/// 🔧 Merges environment variables (`STASHX_*`) with an optional TOML file.
///   - `config_file_name` is None  → env vars only. No file. No assumptions.
///   - `config_file_name` is Some  → env vars + TOML file, merged. TOML wins on conflicts.
///
/// 💀 Returns an error if config is unparseable or fails validation. The message says which.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppenderConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("STASHX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (STASHX_*). \
             The file exists in our hearts, but apparently not in a shape serde recognizes.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (STASHX_*). \
                 No file was provided, this one's all on the environment. Classic."
            .to_string(),
    };

    let appender_config: AppenderConfig = config.extract().context(context_msg)?;
    appender_config
        .validate()
        .context("💀 Configuration parsed, but it doesn't make sense. Fix the value above.")?;
    Ok(appender_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    #[test]
    fn the_one_where_every_knob_is_turned() {
        let file = write_test_config(
            r#"
            buffer_capacity = 64
            status_capacity = 8

            [store.Redis]
            host = "redis.internal"
            port = 6380
            timeout_ms = 250
            password = "hunter2"
            database = 3
            key = "app-logs"

            [format]
            type_tag = "svc"
            source_host = "web-1"
            source_file = "/var/log/svc"
            include_caller_context = true
            "#,
        );

        let config = load_config(Some(file.path()))
            .expect("💀 A fully specified config should parse. The schema drift goblin does not get this win.");

        assert_eq!(config.buffer_capacity, 64);
        assert_eq!(config.status_capacity, 8);
        match config.store {
            StoreConfig::Redis(redis) => {
                assert_eq!(redis.host, "redis.internal");
                assert_eq!(redis.port, 6380);
                assert_eq!(redis.timeout_ms, 250);
                assert_eq!(redis.password.as_deref(), Some("hunter2"));
                assert_eq!(redis.database, 3);
                assert_eq!(redis.key, "app-logs");
            }
            honestly_who_knows => panic!(
                "💀 Expected a Redis store config, but serde took us to {:?}. Plot twist energy.",
                honestly_who_knows
            ),
        }
        assert_eq!(config.format.type_tag, "svc");
        assert_eq!(config.format.source_host.as_deref(), Some("web-1"));
        assert!(config.format.include_caller_context);
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config("[format]\ntype_tag = \"svc\"\n");

        let config: AppenderConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 Defaults should fill every gap.");

        assert_eq!(config.buffer_capacity, 1024);
        assert_eq!(config.format.source_file, "logback");
        match config.store {
            StoreConfig::Redis(redis) => {
                assert_eq!(redis.host, "127.0.0.1");
                assert_eq!(redis.port, 6379);
                assert_eq!(redis.timeout_ms, 5000);
                assert_eq!(redis.key, "logstash");
                assert_eq!(redis.database, 0);
            }
            StoreConfig::InMemory => panic!("💀 the default store is redis"),
        }
    }

    #[test]
    fn the_one_where_the_in_memory_store_is_a_one_liner() {
        let file = write_test_config("store = \"InMemory\"\n");
        let config = load_config(Some(file.path())).expect("💀 InMemory should parse");
        assert!(matches!(config.store, StoreConfig::InMemory));
    }

    #[test]
    fn the_one_where_a_lopsided_ring_is_rejected() {
        let file = write_test_config("buffer_capacity = 1000\n");
        let err = load_config(Some(file.path())).expect_err("💀 1000 is not a power of two");
        assert!(format!("{err:#}").contains("power of two"));
    }

    #[test]
    fn the_one_where_an_empty_key_is_rejected() {
        let config = RedisStoreConfig {
            key: String::new(),
            ..RedisStoreConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(RedisStoreConfig::default().validate().is_ok());
    }
}
