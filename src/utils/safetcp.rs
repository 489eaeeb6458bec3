//! Framed TCP read/write helper functions.
//!
//! Every message on the wire is an 8-byte big-endian length followed by the
//! MessagePack encoding of the message. An RPC is one connection carrying
//! exactly one request frame and at most one reply frame.

use std::marker::Unpin;

use crate::utils::PbkvError;

use serde::Serialize;
use serde::de::DeserializeOwned;

use rmp_serde::encode::to_vec as encode_to_vec;
use rmp_serde::decode::from_slice as decode_from_slice;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Duration};

/// Refuse frames larger than this many bytes; a corrupted length prefix
/// should not make us allocate unbounded memory.
const MAX_FRAME_LEN: u64 = 1 << 30;

/// Reads one length-prefixed object of type `T` from `conn_read`.
pub(crate) async fn read_frame<T, Conn>(
    conn_read: &mut Conn,
) -> Result<T, PbkvError>
where
    T: DeserializeOwned,
    Conn: AsyncReadExt + Unpin,
{
    let obj_len = conn_read.read_u64().await?; // read length first
    if obj_len > MAX_FRAME_LEN {
        return Err(PbkvError::msg(format!(
            "frame length {} exceeds limit",
            obj_len
        )));
    }

    #[allow(clippy::cast_possible_truncation)]
    let mut obj_buf: Vec<u8> = vec![0; obj_len as usize];
    conn_read.read_exact(&mut obj_buf[..]).await?;
    Ok(decode_from_slice(&obj_buf)?)
}

/// Writes one length-prefixed object of type `T` to `conn_write`.
pub(crate) async fn write_frame<T, Conn>(
    obj: &T,
    conn_write: &mut Conn,
) -> Result<(), PbkvError>
where
    T: Serialize,
    Conn: AsyncWriteExt + Unpin,
{
    let obj_bytes = encode_to_vec(obj)?;
    conn_write.write_u64(obj_bytes.len() as u64).await?; // send length first
    conn_write.write_all(&obj_bytes[..]).await?;
    conn_write.flush().await?;
    Ok(())
}

/// Connects to `addr`, sends `req`, and waits for the reply.
async fn exchange<Req, Rep>(addr: &str, req: &Req) -> Result<Rep, PbkvError>
where
    Req: Serialize + Sync,
    Rep: DeserializeOwned,
{
    let mut stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    write_frame(req, &mut stream).await?;
    read_frame(&mut stream).await
}

/// Performs one request-reply exchange with the node listening on `addr`
/// over a fresh connection. Connecting, sending, and receiving are together
/// bounded by `timeout`; an elapsed timeout is returned as an error just like
/// a refused or reset connection.
pub(crate) async fn tcp_call<Req, Rep>(
    addr: &str,
    req: &Req,
    timeout: Duration,
) -> Result<Rep, PbkvError>
where
    Req: Serialize + Sync,
    Rep: DeserializeOwned,
{
    time::timeout(timeout, exchange(addr, req)).await?
}
