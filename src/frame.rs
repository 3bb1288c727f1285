// ABOUTME: The 8-byte frame header shared by every argument/return/request value,
// ABOUTME: and the chunked byte-stream sub-protocol nested inside a Stream frame.

use crate::codec::TypeKind;
use crate::error::ProtocolError;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Run `fut`, bounding it by `deadline` when one is set and mapping a
/// timeout into a `ProtocolError::Io`. Used by `ChunkReader`/`ChunkWriter` to
/// refresh a deadline around each individual chunk read/write rather than
/// the whole stream (spec §5).
async fn bound<F, T>(deadline: Option<Duration>, fut: F) -> Result<T, ProtocolError>
where
    F: std::future::Future<Output = Result<T, ProtocolError>>,
{
    match deadline {
        None => fut.await,
        Some(d) => match tokio::time::timeout(d, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "deadline exceeded"))),
        },
    }
}

/// `u16 type_kind, u16 type_name_len, u32 data_len` — see spec §4.1.
pub const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct FrameHeader {
    pub kind: TypeKind,
    pub name_len: u16,
    pub data_len: u32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..2].copy_from_slice(&(u16::from(self.kind)).to_le_bytes());
        buf[2..4].copy_from_slice(&self.name_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.data_len.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let raw_kind = u16::from_le_bytes([buf[0], buf[1]]);
        let kind = TypeKind::try_from(raw_kind).map_err(|_| ProtocolError::InvalidKind(raw_kind))?;
        let name_len = u16::from_le_bytes([buf[2], buf[3]]);
        let data_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(FrameHeader { kind, name_len, data_len })
    }
}

/// Write a complete framed value: header, then `name`, then `data`. Used for
/// request arguments, responses, and error/no-return replies. Does not flush.
pub async fn write_framed<W: AsyncWrite + Unpin>(
    w: &mut W,
    kind: TypeKind,
    name: &str,
    data: &[u8],
) -> Result<(), ProtocolError> {
    let header = FrameHeader {
        kind,
        name_len: name.len() as u16,
        data_len: data.len() as u32,
    };
    w.write_all(&header.encode()).await?;
    w.write_all(name.as_bytes()).await?;
    w.write_all(data).await?;
    Ok(())
}

/// Read a complete framed value: header, then `name`, then `data`.
pub async fn read_framed<R: AsyncRead + Unpin>(
    r: &mut R,
) -> Result<(TypeKind, String, Vec<u8>), ProtocolError> {
    let mut header_buf = [0u8; HEADER_LEN];
    r.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&header_buf)?;

    let mut name = vec![0u8; header.name_len as usize];
    r.read_exact(&mut name).await?;
    let name = String::from_utf8_lossy(&name).into_owned();

    let mut data = vec![0u8; header.data_len as usize];
    r.read_exact(&mut data).await?;

    Ok((header.kind, name, data))
}

/// Read one chunk-size line (`<hex>\r\n`) from `r`, returning the declared
/// byte length. A line that cannot be parsed as hex is a protocol error.
async fn read_chunk_size<R: AsyncRead + Unpin>(r: &mut R) -> Result<usize, ProtocolError> {
    let mut line = Vec::with_capacity(8);
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
        if line.len() > 16 {
            return Err(ProtocolError::BadStreamType("chunk size line too long".into()));
        }
    }
    let text = std::str::from_utf8(&line)
        .map_err(|_| ProtocolError::BadStreamType("non-ascii chunk size".into()))?;
    usize::from_str_radix(text, 16)
        .map_err(|_| ProtocolError::BadStreamType(format!("invalid chunk size {text:?}")))
}

/// Read a single chunk off `r`, stateless: the caller tracks whether the
/// terminator has already been seen. Shared by `ChunkReader` and the
/// long-lived stream handles in `client::stream`/`request` (`ArgIStream` and
/// friends), which hold a connection behind a mutex rather than a borrowed
/// reference.
pub async fn read_one_chunk<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>, ProtocolError> {
    let len = read_chunk_size(r).await?;
    if len == 0 {
        let mut trailer = [0u8; 2];
        r.read_exact(&mut trailer).await?;
        return Ok(None);
    }
    let mut data = vec![0u8; len];
    r.read_exact(&mut data).await?;
    let mut trailer = [0u8; 2];
    r.read_exact(&mut trailer).await?;
    Ok(Some(data))
}

/// Write a single chunk, or the zero-length terminator if `data` is empty.
/// Stateless counterpart to `read_one_chunk`.
pub async fn write_one_chunk<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<(), ProtocolError> {
    if data.is_empty() {
        w.write_all(b"0\r\n\r\n").await?;
        return Ok(());
    }
    let header = format!("{:x}\r\n", data.len());
    w.write_all(header.as_bytes()).await?;
    w.write_all(data).await?;
    w.write_all(b"\r\n").await?;
    Ok(())
}

/// Reads the chunked sub-protocol described in spec §4.1: a sequence of
/// `<hex_len>\r\n<bytes>\r\n` chunks terminated by a zero-length chunk.
pub struct ChunkReader<'a, R> {
    inner: &'a mut R,
    done: bool,
    deadline: Option<Duration>,
}

impl<'a, R: AsyncRead + Unpin> ChunkReader<'a, R> {
    pub fn new(inner: &'a mut R) -> Self {
        ChunkReader { inner, done: false, deadline: None }
    }

    /// Bound every subsequent chunk read by `deadline`, refreshed per read
    /// rather than applied once across the whole stream.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Read the next chunk body. Returns `Ok(None)` once the zero-length
    /// terminator chunk has been observed (idempotent after that point).
    pub async fn read_chunk(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.done {
            return Ok(None);
        }
        let chunk = bound(self.deadline, read_one_chunk(self.inner)).await?;
        if chunk.is_none() {
            self.done = true;
        }
        Ok(chunk)
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume and discard the rest of the stream, leaving the connection on
    /// a frame boundary. Required after a handler only partially reads an
    /// input stream (spec §4.5 step 6, §8 "Stream drain").
    pub async fn drain(&mut self) -> Result<(), ProtocolError> {
        while self.read_chunk().await?.is_some() {}
        Ok(())
    }

    /// Copy the entire remaining stream into `dest`, returning the number of
    /// bytes copied. Used to push a server-held OStream return value into
    /// the local writer, and symmetric client-side uses.
    pub async fn copy_into<W: AsyncWrite + Unpin>(&mut self, dest: &mut W) -> Result<u64, ProtocolError> {
        let mut total = 0u64;
        while let Some(chunk) = self.read_chunk().await? {
            dest.write_all(&chunk).await?;
            total += chunk.len() as u64;
        }
        Ok(total)
    }
}

/// Writes the chunked sub-protocol described in spec §4.1.
pub struct ChunkWriter<'a, W> {
    inner: &'a mut W,
    finished: bool,
    deadline: Option<Duration>,
}

impl<'a, W: AsyncWrite + Unpin> ChunkWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        ChunkWriter { inner, finished: false, deadline: None }
    }

    /// Bound every subsequent chunk write by `deadline`, refreshed per write
    /// rather than applied once across the whole stream.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Write one chunk. An empty payload is the explicit, only way to send
    /// the end-of-stream terminator (mirrors `original_source/client.go`'s
    /// `chunkWriteCloser.Write` guard against an accidental empty write).
    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        if self.finished {
            return Ok(());
        }
        bound(self.deadline, write_one_chunk(self.inner, data)).await?;
        if data.is_empty() {
            self.finished = true;
        }
        Ok(())
    }

    pub async fn write_eof(&mut self) -> Result<(), ProtocolError> {
        self.write_chunk(&[]).await
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Copy all of `src` out as chunks, then send the terminator. Used to
    /// drive a client-held IStream argument, and symmetric server-side uses.
    pub async fn copy_from<R: AsyncRead + Unpin>(&mut self, src: &mut R) -> Result<u64, ProtocolError> {
        let mut buf = vec![0u8; 16 * 1024];
        let mut total = 0u64;
        loop {
            let n = src.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            self.write_chunk(&buf[..n]).await?;
            total += n as u64;
        }
        self.write_eof().await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn chunk_round_trip_single_write() {
        let mut wire = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut wire);
            w.write_chunk(b"hello world").await.unwrap();
            w.write_eof().await.unwrap();
        }
        assert_eq!(wire, b"b\r\nhello world\r\n0\r\n\r\n");

        let mut cursor = Cursor::new(wire);
        let mut r = ChunkReader::new(&mut cursor);
        assert_eq!(r.read_chunk().await.unwrap(), Some(b"hello world".to_vec()));
        assert_eq!(r.read_chunk().await.unwrap(), None);
        assert!(r.is_done());
    }

    #[tokio::test]
    async fn chunk_round_trip_many_writes() {
        let payload: Vec<u8> = (0u8..=255).cycle().take(10_000).collect();
        let mut wire = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut wire);
            for chunk in payload.chunks(37) {
                w.write_chunk(chunk).await.unwrap();
            }
            w.write_eof().await.unwrap();
        }

        let mut cursor = Cursor::new(wire);
        let mut r = ChunkReader::new(&mut cursor);
        let mut got = Vec::new();
        while let Some(chunk) = r.read_chunk().await.unwrap() {
            got.extend_from_slice(&chunk);
        }
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn copy_from_and_into_round_trip() {
        let payload = b"the quick brown fox jumps over the lazy dog".to_vec();
        let mut wire = Vec::new();
        {
            let mut w = ChunkWriter::new(&mut wire);
            let mut src = Cursor::new(payload.clone());
            w.copy_from(&mut src).await.unwrap();
        }
        let mut cursor = Cursor::new(wire);
        let mut r = ChunkReader::new(&mut cursor);
        let mut dest = Vec::new();
        r.copy_into(&mut dest).await.unwrap();
        assert_eq!(dest, payload);
    }

    #[tokio::test]
    async fn frame_header_round_trip() {
        let mut wire = Vec::new();
        write_framed(&mut wire, TypeKind::Message, "Quotient", b"{\"q\":1}")
            .await
            .unwrap();
        let mut cursor = Cursor::new(wire);
        let (kind, name, data) = read_framed(&mut cursor).await.unwrap();
        assert_eq!(kind, TypeKind::Message);
        assert_eq!(name, "Quotient");
        assert_eq!(data, b"{\"q\":1}");
    }

    #[tokio::test]
    async fn invalid_kind_is_rejected() {
        let mut wire = vec![99, 0, 0, 0, 0, 0, 0, 0];
        let mut cursor = Cursor::new(&mut wire);
        let err = read_framed(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidKind(99)));
    }
}
