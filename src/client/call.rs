// ABOUTME: The caller-facing `Client`: dial, the single-token busy gate, and the
// ABOUTME: request/response round trip mirrored from `original_source/client.go`.

use crate::client::stream::{DuplexStream, ReadStream, WriteStream};
use crate::codec::{StreamKind, TypeKind, Value};
use crate::config::ClientConfig;
use crate::connection::{self, Connection};
use crate::error::ClientError;
use crate::frame::{self, ChunkReader, ChunkWriter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex, Semaphore};
use tracing::debug;

/// One request argument, mirroring `original_source/client.go`'s
/// `RequestArg`. A stream argument carries the caller's own concrete
/// reader/writer, since in argument position the caller is always the side
/// that holds a concrete object (see `crate::request::ArgValue`'s doc).
pub enum CallArg {
    Normal(Value),
    Message(String, serde_json::Value),
    IStream(std::pin::Pin<Box<dyn AsyncRead + Send>>),
    OStream(std::pin::Pin<Box<dyn AsyncWrite + Send>>),
    Stream(std::pin::Pin<Box<dyn AsyncRead + Send>>, std::pin::Pin<Box<dyn AsyncWrite + Send>>),
}

/// What `Client::call` hands back.
pub enum CallResult {
    Normal(Value),
    Message(String, serde_json::Value),
    Stream(ClientStream),
    NoReturn,
}

/// The three shapes a `Stream`-kind response can take, matching the
/// `istream`/`ostream`/`stream` return type names.
pub enum ClientStream {
    Read(ReadStream),
    Write(WriteStream),
    Duplex(DuplexStream),
}

/// A connected RPC client. One TCP connection, busy/idle gated by a
/// single-token semaphore (spec §9's recommendation; mirrors
/// `original_source/client.go`'s `readyCh`), with the next-unused sequence
/// number behind an atomic counter in place of the original's mutex.
pub struct Client {
    conn: Arc<Mutex<Connection>>,
    gate: Arc<Semaphore>,
    seq: AtomicU64,
    closed: AtomicBool,
    call_timeout: std::time::Duration,
}

impl Client {
    /// Connect and complete the handshake. Equivalent to
    /// `original_source/client.go`'s `Dial`.
    pub async fn dial<A: ToSocketAddrs>(addr: A, config: ClientConfig) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let mut conn = Connection::new(stream, config.read_timeout, config.write_timeout);
        conn.send_magic().await?;
        Ok(Client {
            conn: Arc::new(Mutex::new(conn)),
            gate: Arc::new(Semaphore::new(1)),
            seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            call_timeout: config.call_timeout,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Invoke `service.method` with `args`. At most one of `args` may be a
    /// `CallArg::Stream*` variant (spec §4.4 step 2; enforced the same way
    /// `original_source/client.go`'s `errClientMultipleStream` is). Bounded by
    /// the configured `call_timeout`, covering everything up through the
    /// response header — a returned stream handle's own chunk reads/writes
    /// are not subject to this deadline, since their lifetime is the
    /// caller's to manage.
    pub async fn call(&self, service: &str, method: &str, args: Vec<CallArg>) -> Result<CallResult, ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        let permit = self.gate.clone().acquire_owned().await.expect("gate semaphore is never closed");
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);

        let result = match tokio::time::timeout(self.call_timeout, self.call_inner(service, method, seq, args, permit))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "call exceeded call_timeout",
            ))),
        };

        match result {
            Ok(result) => Ok(result),
            Err(e) => {
                if !e.is_non_serious() {
                    self.closed.store(true, Ordering::Release);
                }
                Err(e)
            }
        }
    }

    async fn call_inner(
        &self,
        service: &str,
        method: &str,
        seq: u64,
        args: Vec<CallArg>,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> Result<CallResult, ClientError> {
        let mut stream_arg: Option<CallArg> = None;
        {
            let mut c = self.conn.lock().await;
            let wt = c.write_timeout();
            let line = format!("{service} {method} {} {seq}\r\n", args.len());
            connection::with_deadline(wt, c.writer_mut().write_all(line.as_bytes())).await?;
            for arg in args {
                match arg {
                    CallArg::Normal(v) => {
                        connection::with_deadline_protocol(
                            wt,
                            frame::write_framed(c.writer_mut(), TypeKind::Normal, v.type_name(), &v.encode()),
                        )
                        .await?;
                    }
                    CallArg::Message(name, json) => {
                        let data = serde_json::to_vec(&json).map_err(|e| {
                            ClientError::Protocol(crate::error::ProtocolError::BadStreamType(format!(
                                "failed to encode message argument: {e}"
                            )))
                        })?;
                        connection::with_deadline_protocol(
                            wt,
                            frame::write_framed(c.writer_mut(), TypeKind::Message, &name, &data),
                        )
                        .await?;
                    }
                    stream @ (CallArg::IStream(_) | CallArg::OStream(_) | CallArg::Stream(_, _)) => {
                        if stream_arg.is_some() {
                            return Err(ClientError::MultipleStream);
                        }
                        let kind = match &stream {
                            CallArg::IStream(_) => StreamKind::IStream,
                            CallArg::OStream(_) => StreamKind::OStream,
                            _ => StreamKind::Stream,
                        };
                        connection::with_deadline_protocol(
                            wt,
                            frame::write_framed(c.writer_mut(), TypeKind::Stream, kind.type_name(), &[]),
                        )
                        .await?;
                        stream_arg = Some(stream);
                    }
                }
            }
            connection::with_deadline(wt, c.flush()).await?;
        }

        if let Some(arg) = stream_arg {
            self.drive_stream_arg(arg).await?;
        }

        self.read_response(seq, permit).await
    }

    /// Push/pull/both, driving a stream argument to completion before the
    /// response is read — the caller's own data is the concrete object here,
    /// so the caller is the producer for `istream`/`stream` and the
    /// consumer for `ostream` (spec §4.3).
    async fn drive_stream_arg(&self, arg: CallArg) -> Result<(), ClientError> {
        let mut c = self.conn.lock().await;
        match arg {
            CallArg::IStream(mut src) => {
                let wt = c.write_timeout();
                let mut w = ChunkWriter::new(c.writer_mut()).with_deadline(wt);
                w.copy_from(&mut src).await?;
                connection::with_deadline(wt, c.flush()).await?;
            }
            CallArg::OStream(mut dest) => {
                let rt = c.read_timeout();
                let mut r = ChunkReader::new(c.reader_mut()).with_deadline(rt);
                r.copy_into(&mut dest).await?;
            }
            CallArg::Stream(mut src, mut dest) => {
                let rt = c.read_timeout();
                let wt = c.write_timeout();
                let (reader_half, writer_half) = c.halves_mut();
                let mut r = ChunkReader::new(reader_half).with_deadline(rt);
                let mut w = ChunkWriter::new(writer_half).with_deadline(wt);
                let (read_res, write_res) = tokio::join!(r.copy_into(&mut dest), w.copy_from(&mut src));
                read_res?;
                write_res?;
            }
            CallArg::Normal(_) | CallArg::Message(_, _) => unreachable!("only stream args are queued"),
        }
        Ok(())
    }

    async fn read_response(
        &self,
        expected_seq: u64,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> Result<CallResult, ClientError> {
        let (resp_seq, kind, name, data) = {
            let mut c = self.conn.lock().await;
            let rt = c.read_timeout();
            let mut seq_buf = [0u8; 8];
            connection::with_deadline(rt, c.reader_mut().read_exact(&mut seq_buf)).await?;
            let seq = u64::from_le_bytes(seq_buf);
            let (kind, name, data) = connection::with_deadline_protocol(rt, frame::read_framed(c.reader_mut())).await?;
            (seq, kind, name, data)
        };
        if resp_seq != expected_seq {
            return Err(ClientError::SequenceMismatch { expected: expected_seq, got: resp_seq });
        }

        match kind {
            TypeKind::Normal => {
                let value = Value::decode(&name, &data)
                    .map_err(|e| ClientError::Protocol(crate::error::ProtocolError::BadStreamType(e.to_string())))?;
                Ok(CallResult::Normal(value))
            }
            TypeKind::Error => {
                debug!(seq = resp_seq, "call returned a non-serious error");
                Err(ClientError::NonSerious(String::from_utf8_lossy(&data).into_owned()))
            }
            TypeKind::Message => {
                let json: serde_json::Value = serde_json::from_slice(&data).map_err(|e| {
                    ClientError::Protocol(crate::error::ProtocolError::BadStreamType(format!(
                        "bad message response: {e}"
                    )))
                })?;
                Ok(CallResult::Message(name, json))
            }
            TypeKind::NoReturn => Ok(CallResult::NoReturn),
            TypeKind::Stream => {
                let stream_kind = StreamKind::parse(&name)
                    .ok_or_else(|| ClientError::Protocol(crate::error::ProtocolError::BadStreamType(name)))?;
                let handle = match stream_kind {
                    StreamKind::IStream => ClientStream::Read(ReadStream::new(self.conn.clone(), permit)),
                    StreamKind::OStream => ClientStream::Write(WriteStream::new(self.conn.clone(), permit)),
                    StreamKind::Stream => ClientStream::Duplex(DuplexStream::new(self.conn.clone(), permit)),
                };
                Ok(CallResult::Stream(handle))
            }
        }
    }
}
