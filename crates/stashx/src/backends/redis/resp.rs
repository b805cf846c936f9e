//! 🧵 Just enough RESP2 to talk to redis: command frames out, single replies in.
//!
//! Every command we send (AUTH, SELECT, PING, RPUSH, QUIT) answers with a simple string,
//! an error, an integer or a bulk string. Arrays never come back, so they are a
//! protocol error here.

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// 📏 redis's own `proto-max-bulk-len`. Anything longer is a liar, not a reply.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Simple(String),
    /// the server said no. the connection is still fine.
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
}

/// 📦 `*N\r\n` then `$len\r\narg\r\n` per argument. Binary safe.
pub(crate) fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let payload: usize = args.iter().map(|arg| arg.len() + 16).sum();
    let mut frame = Vec::with_capacity(16 + payload);
    frame.push(b'*');
    frame.extend_from_slice(args.len().to_string().as_bytes());
    frame.extend_from_slice(b"\r\n");
    for arg in args {
        frame.push(b'$');
        frame.extend_from_slice(arg.len().to_string().as_bytes());
        frame.extend_from_slice(b"\r\n");
        frame.extend_from_slice(arg);
        frame.extend_from_slice(b"\r\n");
    }
    frame
}

pub(crate) async fn read_reply<R>(reader: &mut R) -> Result<Reply>
where
    R: AsyncBufRead + Unpin + Send,
{
    let line = read_line(reader).await?;
    let Some(kind) = line.bytes().next() else {
        bail!("💀 Redis sent an empty line where a reply should be.");
    };

    // -- ✂️ the type byte is ascii in every arm below, so slicing at 1 is safe
    match kind {
        b'+' => Ok(Reply::Simple(line[1..].to_owned())),
        b'-' => Ok(Reply::Error(line[1..].to_owned())),
        b':' => {
            let value = line[1..]
                .parse()
                .with_context(|| format!("💀 Redis sent a malformed integer reply: {line:?}"))?;
            Ok(Reply::Integer(value))
        }
        b'$' => {
            let length: i64 = line[1..]
                .parse()
                .with_context(|| format!("💀 Redis sent a malformed bulk length: {line:?}"))?;
            if length < 0 {
                return Ok(Reply::Bulk(None));
            }
            if length > MAX_BULK_LEN {
                bail!("💀 Redis announced a {length} byte bulk reply. The limit is {MAX_BULK_LEN}.");
            }
            let length = length as usize;
            let mut body = vec![0; length + 2];
            reader
                .read_exact(&mut body)
                .await
                .context("💀 Redis hung up in the middle of a bulk reply.")?;
            if !body.ends_with(b"\r\n") {
                bail!("💀 Redis bulk reply was not terminated by CRLF.");
            }
            body.truncate(length);
            Ok(Reply::Bulk(Some(body)))
        }
        _ => bail!("💀 Unexpected redis reply type in {line:?}. We only speak simple replies."),
    }
}

async fn read_line<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin + Send,
{
    let mut buf = Vec::with_capacity(64);
    let read = reader
        .read_until(b'\n', &mut buf)
        .await
        .context("💀 Failed to read a reply from redis.")?;
    if read == 0 {
        bail!("💀 Redis closed the connection before replying.");
    }
    if !buf.ends_with(b"\r\n") {
        bail!("💀 Redis reply line was not terminated by CRLF.");
    }
    buf.truncate(buf.len() - 2);
    String::from_utf8(buf).context("💀 Redis reply line was not UTF-8.")
}
