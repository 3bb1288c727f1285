// ABOUTME: The accept loop and per-connection lifecycle, mirroring
// ABOUTME: `original_source/server.go`'s `Server.Serve`/`handleConn`.

use crate::config::ServerConfig;
use crate::connection::{self, Connection};
use crate::error::ProtocolError;
use crate::request::{read_line, RequestLine};
use crate::server::dispatch;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, warn};

/// A running RPC server. Registration happens process-wide through
/// [`crate::service::register`]; `Server` itself only owns the accept loop
/// and its tunables.
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Server { config }
    }

    /// Bind `addr` and serve forever. Equivalent to
    /// `original_source/server.go`'s `ListenAndServe`.
    pub async fn listen_and_serve<A: ToSocketAddrs>(&self, addr: A) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Accept connections from an already-bound listener forever, spawning
    /// one task per connection. A connection's eventual I/O error is logged
    /// and does not affect other connections or the accept loop itself —
    /// each connection is isolated exactly as in the teacher's per-connection
    /// `tokio::spawn` pattern.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = ?listener.local_addr().ok(), "server listening");
        let gate = self.config.max_connections.map(|max| Arc::new(Semaphore::new(max)));
        loop {
            let (stream, peer) = listener.accept().await?;
            let config = self.config.clone();
            let permit = match &gate {
                Some(gate) => Some(gate.clone().acquire_owned().await.expect("accept gate semaphore is never closed")),
                None => None,
            };
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handle_connection(stream, &config).await {
                    warn!(%peer, error = %e, "connection closed with error");
                }
            });
        }
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, config: &ServerConfig) -> Result<(), ProtocolError> {
    let mut conn = Connection::new(stream, config.read_timeout, config.write_timeout);
    let read_timeout = conn.read_timeout();
    tokio::time::timeout(read_timeout, conn.verify_magic())
        .await
        .map_err(|_| ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake timed out")))??;
    let conn = Arc::new(Mutex::new(conn));

    loop {
        let line = {
            let mut c = conn.lock().await;
            let read_timeout = c.read_timeout();
            match connection::with_deadline(read_timeout, read_line(c.reader_mut())).await {
                Ok(line) => line,
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
                Err(e) => return Err(ProtocolError::Io(e)),
            }
        };
        let request_line = RequestLine::parse(&line)?;
        if let Err(e) = dispatch::handle_request(&conn, &request_line).await {
            error!(seq = request_line.seq, error = %e, "fatal protocol error, closing connection");
            return Err(e);
        }
    }
}
