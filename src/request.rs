// ABOUTME: Server-side request parsing — the request line, the per-argument frame
// ABOUTME: reader, and the live stream handles handed to a running method body.

use crate::codec::{StreamKind, TypeKind, Value};
use crate::connection::{self, Connection};
use crate::error::{ProtocolError, RequestError};
use crate::frame::{self, ChunkReader};
use crate::message;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// The parsed request line: `<service> <method> <argc> <seq>\r\n` (spec §4.1).
#[derive(Debug, Clone)]
pub struct RequestLine {
    pub service: String,
    pub method: String,
    pub argc: u32,
    pub seq: u64,
}

impl RequestLine {
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let mut parts = line.trim_end().split_whitespace();
        let service = parts.next().ok_or(ProtocolError::BadRequestLine)?.to_string();
        let method = parts.next().ok_or(ProtocolError::BadRequestLine)?.to_string();
        let argc: u32 = parts
            .next()
            .ok_or(ProtocolError::BadRequestLine)?
            .parse()
            .map_err(|_| ProtocolError::BadRequestLine)?;
        let seq: u64 = parts
            .next()
            .ok_or(ProtocolError::BadRequestLine)?
            .parse()
            .map_err(|_| ProtocolError::BadRequestLine)?;
        if parts.next().is_some() {
            return Err(ProtocolError::BadRequestLine);
        }
        Ok(RequestLine { service, method, argc, seq })
    }

    pub fn render(&self) -> String {
        format!("{} {} {} {}\r\n", self.service, self.method, self.argc, self.seq)
    }
}

/// Read one `\r\n`-terminated line from `r`, byte at a time (the request
/// line is short and this avoids pulling in a line-buffering crate for a
/// single use site — mirrors `original_source/conn.go`'s `readLine`).
pub async fn read_line<R: AsyncRead + Unpin>(r: &mut R) -> io::Result<String> {
    use tokio::io::AsyncReadExt;
    let mut out = Vec::with_capacity(64);
    loop {
        let mut byte = [0u8; 1];
        let n = r.read(&mut byte).await?;
        if n == 0 {
            if out.is_empty() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"));
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        out.push(byte[0]);
    }
    while out.last() == Some(&b'\r') {
        out.pop();
    }
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// A decoded request argument, ready to hand to a method's handler closure.
pub enum ArgValue {
    Normal(Value),
    Message(serde_json::Value),
    IStream(ArgIStream),
    OStream(ArgOStream),
    Stream(ArgStream),
}

/// Called once after a stream return's body has finished draining onto the
/// wire, win or lose, so a handler can release whatever resource backed the
/// stream (spec §3's `(stream, onFinish, error)` shape; §4.5 step 8).
/// Mirrors `original_source/conn.go`'s `defer rtns[1].Interface().(func())()`
/// — the fileserver example's `OpenFile` uses this to `file.Close()`.
pub type OnFinish = Box<dyn FnOnce() + Send>;

/// What a handler hands back for a `Stream`-kind return value. Unlike
/// argument streams (live handles into the connection, driven while the
/// handler runs), a return stream is a plain in-memory byte source/sink that
/// the dispatcher pumps onto the wire after the handler future resolves —
/// the same shape as `original_source/conn.go`'s `responseStream`, adapted
/// so pumping doesn't need to block the handler's own execution.
///
/// Direction follows the same rule as argument streams: the side holding the
/// concrete object is the producer. In return position that's the handler,
/// so an `istream` return means the handler supplies a *reader* (pushed onto
/// the wire for the caller to read) and an `ostream` return means the
/// handler supplies a *writer* (filled from bytes the caller pushes).
pub enum StreamBody {
    IStream(std::pin::Pin<Box<dyn AsyncRead + Send>>, Option<OnFinish>),
    OStream(std::pin::Pin<Box<dyn AsyncWrite + Send>>, Option<OnFinish>),
    Duplex(
        std::pin::Pin<Box<dyn AsyncRead + Send>>,
        std::pin::Pin<Box<dyn AsyncWrite + Send>>,
        Option<OnFinish>,
    ),
}

pub enum RetValue {
    Normal(Value),
    Message(String, serde_json::Value),
    Stream(StreamBody),
    NoReturn,
}

/// Live read handle for an `istream` argument: the caller already holds a
/// concrete writer and is pushing chunks, so the handler pulls them here.
pub struct ArgIStream {
    conn: Arc<Mutex<Connection>>,
    done: AtomicBool,
}

impl ArgIStream {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        ArgIStream { conn, done: AtomicBool::new(false) }
    }

    pub async fn read_chunk(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.done.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut conn = self.conn.lock().await;
        let timeout = conn.read_timeout();
        let chunk = connection::with_deadline_protocol(timeout, frame::read_one_chunk(conn.reader_mut())).await?;
        if chunk.is_none() {
            self.done.store(true, Ordering::Release);
        }
        Ok(chunk)
    }

    /// Read every remaining chunk and concatenate them.
    pub async fn read_to_end(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Discard any remaining chunks without copying them anywhere. Required
    /// after a handler only partially consumes its istream argument (spec
    /// §4.5 step 6), so the next request starts on a frame boundary.
    pub async fn drain(&self) -> Result<(), ProtocolError> {
        while self.read_chunk().await?.is_some() {}
        Ok(())
    }
}

/// Live write handle for an `ostream` argument: the handler is the producer
/// and pushes chunks directly to the caller while it runs.
pub struct ArgOStream {
    conn: Arc<Mutex<Connection>>,
    finished: AtomicBool,
}

impl ArgOStream {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        ArgOStream { conn, finished: AtomicBool::new(false) }
    }

    pub async fn write_chunk(&self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.finished.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let timeout = conn.write_timeout();
        connection::with_deadline_protocol(timeout, frame::write_one_chunk(conn.writer_mut(), data)).await?;
        if data.is_empty() {
            self.finished.store(true, Ordering::Release);
        }
        Ok(())
    }

    pub async fn write_eof(&self) -> Result<(), ProtocolError> {
        self.write_chunk(&[]).await
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// Live duplex handle for a `stream` argument: both directions are driven
/// concurrently by the handler and the caller.
pub struct ArgStream {
    reader: ArgIStream,
    writer: ArgOStream,
}

impl ArgStream {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        ArgStream {
            reader: ArgIStream::new(conn.clone()),
            writer: ArgOStream::new(conn),
        }
    }

    pub async fn read_chunk(&self) -> Result<Option<Vec<u8>>, ProtocolError> {
        self.reader.read_chunk().await
    }

    pub async fn write_chunk(&self, data: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_chunk(data).await
    }

    pub async fn write_eof(&self) -> Result<(), ProtocolError> {
        self.writer.write_eof().await
    }

    pub async fn drain(&self) -> Result<(), ProtocolError> {
        self.reader.drain().await
    }
}

/// Reads the `argc` argument frames of a request in order, decoding each per
/// `expected` when the service/method was resolved. Mirrors
/// `original_source/request.go`'s two-phase `netArgReader`: headers (and any
/// inline data) are read for every argument first; a stream argument's
/// chunked body is only touched afterward, via the handle it produced.
pub async fn read_args(
    conn: &Arc<Mutex<Connection>>,
    argc: u32,
    expected: &[crate::service::ArgSpec],
) -> Result<Vec<ArgValue>, RequestError> {
    if expected.len() != argc as usize {
        return Err(RequestError::ArgCountMismatch {
            expected: expected.len(),
            got: argc as usize,
        });
    }
    let mut out = Vec::with_capacity(argc as usize);
    for spec in expected {
        let (kind, name, data) = {
            let mut c = conn.lock().await;
            let timeout = c.read_timeout();
            connection::with_deadline_protocol(timeout, frame::read_framed(c.reader_mut()))
                .await
                .map_err(protocol_to_request)?
        };
        let value = match (spec, kind) {
            (crate::service::ArgSpec::Normal(_), TypeKind::Normal) => ArgValue::Normal(Value::decode(&name, &data)?),
            (crate::service::ArgSpec::Message(idl), TypeKind::Message) => {
                if &name != idl {
                    return Err(RequestError::UnknownMessage(name));
                }
                let json: serde_json::Value = message::decode_message(idl, &data)?;
                ArgValue::Message(json)
            }
            (crate::service::ArgSpec::Stream(expected_kind), TypeKind::Stream) => {
                let actual = StreamKind::parse(&name)
                    .ok_or_else(|| RequestError::Message(format!("unrecognized stream type: {name}")))?;
                if actual != *expected_kind {
                    return Err(RequestError::Message(format!(
                        "expected {expected_kind:?} stream argument, got {actual:?}"
                    )));
                }
                match actual {
                    StreamKind::IStream => ArgValue::IStream(ArgIStream::new(conn.clone())),
                    StreamKind::OStream => ArgValue::OStream(ArgOStream::new(conn.clone())),
                    StreamKind::Stream => ArgValue::Stream(ArgStream::new(conn.clone())),
                }
            }
            _ => return Err(RequestError::Message(format!("argument type mismatch for {name:?}"))),
        };
        out.push(value);
    }
    Ok(out)
}

fn protocol_to_request(e: ProtocolError) -> RequestError {
    RequestError::Message(e.to_string())
}

/// Reads and discards the `argc` argument frames of a request whose
/// service/method could not be resolved, so the connection stays on a frame
/// boundary and the caller can still be sent a non-fatal `Error` response
/// (spec §4.5 step 4). A declared `istream`/duplex `stream` argument is
/// drained from the wire; a declared `ostream`/duplex argument has nothing
/// incoming to drain, so an immediate end-of-stream chunk is written in its
/// place — the same no-op a real handler would produce by never writing to
/// it.
pub async fn skip_unknown_args(conn: &Arc<Mutex<Connection>>, argc: u32) -> Result<(), ProtocolError> {
    for _ in 0..argc {
        let (kind, name, _data) = {
            let mut c = conn.lock().await;
            let timeout = c.read_timeout();
            connection::with_deadline_protocol(timeout, frame::read_framed(c.reader_mut())).await?
        };
        if kind != TypeKind::Stream {
            continue;
        }
        match StreamKind::parse(&name) {
            Some(StreamKind::IStream) => {
                let mut c = conn.lock().await;
                let timeout = c.read_timeout();
                ChunkReader::new(c.reader_mut()).with_deadline(timeout).drain().await?;
            }
            Some(StreamKind::OStream) => {
                let mut c = conn.lock().await;
                let timeout = c.write_timeout();
                connection::with_deadline(timeout, c.writer_mut().write_all(b"0\r\n\r\n")).await?;
                connection::with_deadline(timeout, c.flush()).await?;
            }
            Some(StreamKind::Stream) => {
                let mut c = conn.lock().await;
                let read_timeout = c.read_timeout();
                ChunkReader::new(c.reader_mut()).with_deadline(read_timeout).drain().await?;
                let write_timeout = c.write_timeout();
                connection::with_deadline(write_timeout, c.writer_mut().write_all(b"0\r\n\r\n")).await?;
                connection::with_deadline(write_timeout, c.flush()).await?;
            }
            None => return Err(ProtocolError::BadStreamType(name)),
        }
    }
    Ok(())
}
