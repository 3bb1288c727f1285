// ABOUTME: Client-held stream handles returned by a `Stream`-kind response —
// ABOUTME: the caller's view of `original_source/client.go`'s `genStream` family.

use crate::connection::{self, Connection};
use crate::error::ClientError;
use crate::frame::{self, ChunkReader, ChunkWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedSemaphorePermit};

/// A read-only stream handle, returned for an `istream`-kind response: the
/// method's handler is the producer, so the caller only pulls chunks.
///
/// Holds the connection's busy/idle permit until [`ReadStream::close`] is
/// called, keeping the connection reserved for this call the whole time the
/// stream is in use (spec §4.3's single-token gate).
pub struct ReadStream {
    conn: Arc<Mutex<Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    done: AtomicBool,
}

impl ReadStream {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, permit: OwnedSemaphorePermit) -> Self {
        ReadStream { conn, permit: Some(permit), done: AtomicBool::new(false) }
    }

    pub async fn read_chunk(&self) -> Result<Option<Vec<u8>>, ClientError> {
        if self.done.load(Ordering::Acquire) {
            return Ok(None);
        }
        let mut c = self.conn.lock().await;
        let rt = c.read_timeout();
        let chunk = connection::with_deadline_protocol(rt, frame::read_one_chunk(c.reader_mut()))
            .await
            .map_err(ClientError::Protocol)?;
        if chunk.is_none() {
            self.done.store(true, Ordering::Release);
        }
        Ok(chunk)
    }

    pub async fn read_to_end(&self) -> Result<Vec<u8>, ClientError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.read_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Release the connection back to the pool. Drains any unread chunks
    /// first, so a caller that stops reading early doesn't leave the
    /// connection mid-stream for the next call.
    pub async fn close(mut self) -> Result<(), ClientError> {
        while self.read_chunk().await?.is_some() {}
        self.permit.take();
        Ok(())
    }
}

/// A write-only stream handle, returned for an `ostream`-kind response: the
/// handler is the consumer, so the caller pushes chunks to it.
pub struct WriteStream {
    conn: Arc<Mutex<Connection>>,
    permit: Option<OwnedSemaphorePermit>,
    finished: AtomicBool,
}

impl WriteStream {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, permit: OwnedSemaphorePermit) -> Self {
        WriteStream { conn, permit: Some(permit), finished: AtomicBool::new(false) }
    }

    pub async fn write_chunk(&self, data: &[u8]) -> Result<(), ClientError> {
        if self.finished.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut c = self.conn.lock().await;
        let wt = c.write_timeout();
        connection::with_deadline_protocol(wt, frame::write_one_chunk(c.writer_mut(), data))
            .await
            .map_err(ClientError::Protocol)?;
        connection::with_deadline(wt, c.flush()).await.map_err(ClientError::Io)?;
        if data.is_empty() {
            self.finished.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Send the end-of-stream chunk and release the connection.
    pub async fn close(self) -> Result<(), ClientError> {
        if !self.finished.load(Ordering::Acquire) {
            self.write_chunk(&[]).await?;
        }
        Ok(())
    }
}

/// A full-duplex stream handle, returned for a `stream`-kind response. Reads
/// and writes may run concurrently; each locks the shared connection only
/// for the duration of its own chunk.
pub struct DuplexStream {
    reader: ReadStream,
    writer: WriteStream,
}

impl DuplexStream {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>, permit: OwnedSemaphorePermit) -> Self {
        // Only one handle may hold the permit; the writer half is given a
        // `None` permit and relies on `close` draining through the reader.
        DuplexStream {
            reader: ReadStream::new(conn.clone(), permit),
            writer: WriteStream { conn, permit: None, finished: AtomicBool::new(false) },
        }
    }

    pub async fn read_chunk(&self) -> Result<Option<Vec<u8>>, ClientError> {
        self.reader.read_chunk().await
    }

    pub async fn write_chunk(&self, data: &[u8]) -> Result<(), ClientError> {
        self.writer.write_chunk(data).await
    }

    pub async fn close(self) -> Result<(), ClientError> {
        if !self.writer.finished.load(Ordering::Acquire) {
            self.writer.write_chunk(&[]).await?;
        }
        self.reader.close().await
    }
}
