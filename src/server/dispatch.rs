// ABOUTME: Routes one parsed request line to a registered method and writes its
// ABOUTME: response, mirroring `original_source/server.go`'s `handleRequest`.

use crate::codec::{StreamKind, TypeKind};
use crate::connection::{self, Connection};
use crate::error::{ProtocolError, RequestError};
use crate::frame::{self, ChunkReader, ChunkWriter};
use crate::request::{self, ArgIStream, ArgOStream, RequestLine, RetValue, StreamBody};
use crate::service::{self, ArgSpec};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Dispatch one request. Returns `Ok(())` once a response (possibly an
/// `Error` frame) has been written and the connection is back on a frame
/// boundary. Returns `Err` only when the connection itself can no longer be
/// trusted to be on a frame boundary — the caller must close it.
pub async fn handle_request(conn: &Arc<Mutex<Connection>>, line: &RequestLine) -> Result<(), ProtocolError> {
    let Some(service) = service::lookup(&line.service) else {
        request::skip_unknown_args(conn, line.argc).await?;
        let err = RequestError::UnknownService(line.service.clone());
        return send_error(conn, line.seq, err.to_string()).await;
    };
    let Some(method) = service.methods.get(&line.method) else {
        request::skip_unknown_args(conn, line.argc).await?;
        let err = RequestError::UnknownMethod { service: line.service.clone(), method: line.method.clone() };
        return send_error(conn, line.seq, err.to_string()).await;
    };
    if method.args.len() != line.argc as usize {
        request::skip_unknown_args(conn, line.argc).await?;
        return send_error(
            conn,
            line.seq,
            format!(
                "argument count mismatch for {}.{}: expected {}, got {}",
                line.service,
                line.method,
                method.args.len(),
                line.argc
            ),
        )
        .await;
    }

    // From here, argument frames are read off the wire; a decode failure
    // mid-way leaves the connection state ambiguous, so it is treated as
    // fatal rather than recovered from (original_source/server.go funnels
    // the same failure into a connection-closing return).
    let args = request::read_args(conn, line.argc, &method.args).await.map_err(|e| {
        warn!(service = %line.service, method = %line.method, error = %e, "argument decode failed, closing connection");
        ProtocolError::BadRequestLine
    })?;

    let stream_arg_spec = method.args.iter().find_map(|a| match a {
        ArgSpec::Stream(kind) => Some(*kind),
        _ => None,
    });

    let result = (method.handler)(args).await;

    if let Some(kind) = stream_arg_spec {
        finish_stream_arg(conn, kind).await?;
    }

    match result {
        Ok(ret) => send_response(conn, line.seq, ret).await,
        Err(e) => send_error(conn, line.seq, e.to_string()).await,
    }
}

/// After a handler returns, make sure any stream argument it was given has
/// been fully drained (read side) and terminated (write side), regardless
/// of whether the handler itself consumed it to completion (spec §4.5 step
/// 6, `original_source/server.go`'s post-`Method.Call` cleanup).
async fn finish_stream_arg(conn: &Arc<Mutex<Connection>>, kind: StreamKind) -> Result<(), ProtocolError> {
    match kind {
        StreamKind::IStream => ArgIStream::new(conn.clone()).drain().await,
        StreamKind::OStream => ArgOStream::new(conn.clone()).write_eof().await,
        StreamKind::Stream => {
            ArgIStream::new(conn.clone()).drain().await?;
            ArgOStream::new(conn.clone()).write_eof().await
        }
    }
}

async fn send_error(conn: &Arc<Mutex<Connection>>, seq: u64, message: String) -> Result<(), ProtocolError> {
    debug!(seq, %message, "sending error response");
    let mut c = conn.lock().await;
    let timeout = c.write_timeout();
    connection::with_deadline(timeout, c.writer_mut().write_all(&seq.to_le_bytes())).await?;
    connection::with_deadline_protocol(timeout, frame::write_framed(c.writer_mut(), TypeKind::Error, "", message.as_bytes()))
        .await?;
    connection::with_deadline(timeout, c.flush()).await?;
    Ok(())
}

async fn send_response(conn: &Arc<Mutex<Connection>>, seq: u64, ret: RetValue) -> Result<(), ProtocolError> {
    match ret {
        RetValue::NoReturn => {
            let mut c = conn.lock().await;
            let timeout = c.write_timeout();
            connection::with_deadline(timeout, c.writer_mut().write_all(&seq.to_le_bytes())).await?;
            connection::with_deadline_protocol(timeout, frame::write_framed(c.writer_mut(), TypeKind::NoReturn, "", &[]))
                .await?;
            connection::with_deadline(timeout, c.flush()).await?;
            Ok(())
        }
        RetValue::Normal(v) => {
            let mut c = conn.lock().await;
            let timeout = c.write_timeout();
            connection::with_deadline(timeout, c.writer_mut().write_all(&seq.to_le_bytes())).await?;
            connection::with_deadline_protocol(
                timeout,
                frame::write_framed(c.writer_mut(), TypeKind::Normal, v.type_name(), &v.encode()),
            )
            .await?;
            connection::with_deadline(timeout, c.flush()).await?;
            Ok(())
        }
        RetValue::Message(name, json) => {
            let data = serde_json::to_vec(&json)
                .map_err(|e| ProtocolError::BadStreamType(format!("failed to encode message response: {e}")))?;
            let mut c = conn.lock().await;
            let timeout = c.write_timeout();
            connection::with_deadline(timeout, c.writer_mut().write_all(&seq.to_le_bytes())).await?;
            connection::with_deadline_protocol(timeout, frame::write_framed(c.writer_mut(), TypeKind::Message, &name, &data))
                .await?;
            connection::with_deadline(timeout, c.flush()).await?;
            Ok(())
        }
        RetValue::Stream(body) => send_stream_response(conn, seq, body).await,
    }
}

async fn send_stream_response(
    conn: &Arc<Mutex<Connection>>,
    seq: u64,
    body: StreamBody,
) -> Result<(), ProtocolError> {
    let type_name = match &body {
        StreamBody::IStream(_, _) => StreamKind::IStream.type_name(),
        StreamBody::OStream(_, _) => StreamKind::OStream.type_name(),
        StreamBody::Duplex(_, _, _) => StreamKind::Stream.type_name(),
    };
    {
        let mut c = conn.lock().await;
        let timeout = c.write_timeout();
        connection::with_deadline(timeout, c.writer_mut().write_all(&seq.to_le_bytes())).await?;
        connection::with_deadline_protocol(timeout, frame::write_framed(c.writer_mut(), TypeKind::Stream, type_name, &[]))
            .await?;
        connection::with_deadline(timeout, c.flush()).await?;
    }

    // The handler's resource (e.g. an open file) is released via `onFinish`
    // once the body has finished draining, on every path, success or error —
    // mirrors `original_source/conn.go`'s `defer`-based cleanup.
    match body {
        StreamBody::IStream(mut src, on_finish) => {
            let result = {
                let mut c = conn.lock().await;
                let timeout = c.write_timeout();
                let mut writer = ChunkWriter::new(c.writer_mut()).with_deadline(timeout);
                match writer.copy_from(&mut src).await {
                    Ok(_) => connection::with_deadline(timeout, c.flush()).await.map_err(ProtocolError::Io),
                    Err(e) => Err(e),
                }
            };
            if let Some(on_finish) = on_finish {
                on_finish();
            }
            result
        }
        StreamBody::OStream(mut dest, on_finish) => {
            let result = {
                let mut c = conn.lock().await;
                let timeout = c.read_timeout();
                let mut reader = ChunkReader::new(c.reader_mut()).with_deadline(timeout);
                reader.copy_into(&mut dest).await.map(|_| ())
            };
            if let Some(on_finish) = on_finish {
                on_finish();
            }
            result
        }
        StreamBody::Duplex(mut src, mut dest, on_finish) => {
            let result = {
                let mut c = conn.lock().await;
                let read_timeout = c.read_timeout();
                let write_timeout = c.write_timeout();
                let (reader_half, writer_half) = c.halves_mut();
                let mut reader = ChunkReader::new(reader_half).with_deadline(read_timeout);
                let mut writer = ChunkWriter::new(writer_half).with_deadline(write_timeout);
                let (read_res, write_res) = tokio::join!(reader.copy_into(&mut dest), writer.copy_from(&mut src));
                read_res.and(write_res).map(|_| ())
            };
            if let Some(on_finish) = on_finish {
                on_finish();
            }
            result
        }
    }
}
