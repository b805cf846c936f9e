//! 📡 The redis store: RESP2 over a plain `tokio` TCP stream.
//!
//! 🧠 Knowledge graph:
//! - A new connection sends `AUTH` (when a password is configured) and `SELECT` (when the
//!   database isn't 0) before it is used for anything else.
//! - Connecting and every command are bounded by `timeout_ms`.
//! - The pool holds at most ONE idle connection. The flusher is the only user and it
//!   pushes one batch at a time, so a second idle connection would just sit there.
//! - A connection that failed mid-command (I/O error, timeout, protocol garbage) is
//!   dropped, never returned to the pool. A redis `-ERR` reply leaves it healthy.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::Store;
use crate::app_config::RedisStoreConfig;

mod resp;
use resp::Reply;

/// 📡 Redis-backed [`Store`]. Cheap to build, connects lazily.
#[derive(Debug)]
pub struct RedisStore {
    config: RedisStoreConfig,
    idle: Option<RedisConnection>,
}

impl RedisStore {
    pub fn new(config: RedisStoreConfig) -> Self {
        Self { config, idle: None }
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    async fn acquire(&mut self) -> Result<RedisConnection> {
        match self.idle.take() {
            Some(connection) => Ok(connection),
            None => RedisConnection::open(&self.config).await,
        }
    }

    fn release(&mut self, connection: RedisConnection) {
        // -- 🅿️ one parking spot. if it's taken, this one goes home.
        if self.idle.is_none() {
            self.idle = Some(connection);
        }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn probe(&mut self) -> Result<()> {
        let mut connection = self.acquire().await?;
        let reply = connection.command(&[b"PING"]).await?;
        self.release(connection);
        match reply {
            Reply::Simple(pong) if pong == "PONG" => {
                debug!(address = %self.address(), "📡 Redis answered PING");
                Ok(())
            }
            Reply::Error(message) => bail!("💀 Redis refused PING: {message}"),
            other => bail!("💀 Redis answered PING with {other:?}. That is not a PONG."),
        }
    }

    async fn append_to_list(&mut self, key: &str, documents: &[String]) -> Result<u64> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(documents.len() + 2);
        args.push(b"RPUSH");
        args.push(key.as_bytes());
        args.extend(documents.iter().map(|doc| doc.as_bytes()));

        let mut connection = self.acquire().await?;
        let reply = connection
            .command(&args)
            .await
            .with_context(|| format!("💀 RPUSH of {} documents onto '{key}' failed", documents.len()))?;
        self.release(connection);

        match reply {
            Reply::Integer(length) => {
                trace!(key, documents = documents.len(), length, "📦 RPUSH landed");
                Ok(length.max(0) as u64)
            }
            Reply::Error(message) => bail!("💀 Redis refused RPUSH onto '{key}': {message}"),
            other => bail!("💀 Redis answered RPUSH with {other:?}. Expected the list length."),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut connection) = self.idle.take() {
            // -- 👋 polite goodbye. if redis is already gone, it doesn't need one.
            if let Err(err) = connection.command(&[b"QUIT"]).await {
                debug!("👋 QUIT was not acknowledged: {err:#}");
            }
        }
        Ok(())
    }
}

/// 🔌 One authenticated, database-selected connection.
#[derive(Debug)]
struct RedisConnection {
    stream: BufStream<TcpStream>,
    timeout: Duration,
}

impl RedisConnection {
    async fn open(config: &RedisStoreConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let address = format!("{}:{}", config.host, config.port);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&address))
            .await
            .with_context(|| {
                format!(
                    "💀 Timed out connecting to redis at {address} after {}ms.",
                    config.timeout_ms
                )
            })?
            .with_context(|| format!("💀 Could not connect to redis at {address}. Is it running?"))?;
        stream
            .set_nodelay(true)
            .context("💀 Failed to set TCP_NODELAY on the redis connection.")?;
        debug!(%address, "🔌 Connected to redis");

        let mut connection = Self {
            stream: BufStream::new(stream),
            timeout,
        };

        if let Some(password) = &config.password {
            connection
                .expect_ok(&[b"AUTH", password.as_bytes()])
                .await
                .context("💀 Redis did not accept the configured password.")?;
        }
        if config.database != 0 {
            let database = config.database.to_string();
            connection
                .expect_ok(&[b"SELECT", database.as_bytes()])
                .await
                .with_context(|| format!("💀 Redis would not SELECT database {database}."))?;
        }
        Ok(connection)
    }

    /// 📨 Send one command, read one reply, all inside the timeout.
    async fn command(&mut self, args: &[&[u8]]) -> Result<Reply> {
        let frame = resp::encode_command(args);
        let timeout = self.timeout;
        let stream = &mut self.stream;

        let exchange = async move {
            stream
                .write_all(&frame)
                .await
                .context("💀 Failed to write a command to redis.")?;
            stream
                .flush()
                .await
                .context("💀 Failed to flush a command to redis.")?;
            resp::read_reply(stream).await
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .with_context(|| format!("💀 Redis did not answer within {}ms.", timeout.as_millis()))?
    }

    async fn expect_ok(&mut self, args: &[&[u8]]) -> Result<()> {
        match self.command(args).await? {
            Reply::Simple(_) => Ok(()),
            Reply::Error(message) => bail!("💀 {message}"),
            other => bail!("💀 Expected +OK from redis, got {other:?}."),
        }
    }
}
