// ABOUTME: A single TCP connection carrying the frame protocol: a duplex pair of
// ABOUTME: buffered halves, the magic handshake, and per-operation deadlines.

use crate::error::ProtocolError;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Handshake magic written by the client immediately after connect and
/// verified by the server as the first four bytes after accept (spec §3,
/// §6). Little-endian `0x00686A6C`.
pub const MAGIC: u32 = 0x00686A6C;

/// A TCP connection, split into buffered read/write halves so a stream
/// handle and the request/response path can make independent progress
/// (see `Connection::reader_mut`/`writer_mut`).
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Connection {
    pub fn new(stream: TcpStream, read_timeout: Duration, write_timeout: Duration) -> Self {
        let (rh, wh) = stream.into_split();
        Connection {
            reader: BufReader::new(rh),
            writer: BufWriter::new(wh),
            read_timeout,
            write_timeout,
        }
    }

    pub fn reader_mut(&mut self) -> &mut BufReader<OwnedReadHalf> {
        &mut self.reader
    }

    pub fn writer_mut(&mut self) -> &mut BufWriter<OwnedWriteHalf> {
        &mut self.writer
    }

    /// Split into independent halves, e.g. to drive a full-duplex stream's
    /// read loop and write loop concurrently without re-borrowing the same
    /// field twice.
    pub fn halves_mut(&mut self) -> (&mut BufReader<OwnedReadHalf>, &mut BufWriter<OwnedWriteHalf>) {
        (&mut self.reader, &mut self.writer)
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush().await
    }

    /// Client side of the handshake: write the magic and flush.
    pub async fn send_magic(&mut self) -> std::io::Result<()> {
        self.writer.write_all(&MAGIC.to_le_bytes()).await?;
        self.writer.flush().await
    }

    /// Server side of the handshake: read exactly 4 bytes (a full read, per
    /// SPEC_FULL.md's resolution of the "magic read uses a plain read"
    /// Open Question) and verify against `MAGIC`.
    pub async fn verify_magic(&mut self) -> Result<(), ProtocolError> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf).await?;
        if u32::from_le_bytes(buf) != MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }
        Ok(())
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

/// Run `fut`, failing with a `TimedOut` io error if it doesn't resolve
/// within `duration`. Used to refresh a deadline around each individual
/// socket operation (spec §5, §6: `ReadTimeout`/`WriteTimeout`, default 10s
/// each) — the handshake, request line, argument reads, and every response
/// and stream write each get their own call rather than one deadline
/// spanning the whole exchange.
pub async fn with_deadline<F, T>(duration: Duration, fut: F) -> std::io::Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .unwrap_or_else(|_| Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded")))
}

/// Same as `with_deadline`, for the `ProtocolError`-returning futures that
/// make up most of the frame/chunk read-write surface. Used to refresh a
/// deadline around each individual socket operation on the request/response
/// path (spec §5), rather than bounding only the handshake and request line.
pub async fn with_deadline_protocol<F, T>(duration: Duration, fut: F) -> Result<T, ProtocolError>
where
    F: std::future::Future<Output = Result<T, ProtocolError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded"))),
    }
}
