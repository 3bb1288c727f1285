// ABOUTME: Tunables for the server accept loop and client dial/call path — the
// ABOUTME: ambient configuration layer, shaped like the teacher's KeepAliveConfig.

use std::time::Duration;

/// Server-side tunables. Mirrors `original_source/server.go`'s `Server`
/// struct (`ReadTimeOut`/`WriteTimeOut`), extended with a connection backlog
/// cap since the original's accept loop had none.
///
/// # Example
///
/// ```rust
/// use wirecall::ServerConfig;
/// use std::time::Duration;
///
/// let config = ServerConfig::default();
/// assert_eq!(config.read_timeout, Duration::from_secs(10));
///
/// let config = ServerConfig::new()
///     .with_read_timeout(Duration::from_secs(30))
///     .with_write_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Deadline for a single read on an accepted connection (default: 10s).
    pub read_timeout: Duration,
    /// Deadline for a single write on an accepted connection (default: 10s).
    pub write_timeout: Duration,
    /// Maximum accepted connections handled concurrently before `accept()`
    /// backpressures. `None` means unbounded (default).
    pub max_connections: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_connections: None,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = Some(max);
        self
    }
}

/// Client-side tunables, covering the handshake and per-call deadlines.
///
/// # Example
///
/// ```rust
/// use wirecall::ClientConfig;
/// use std::time::Duration;
///
/// let config = ClientConfig::new().with_call_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    /// Overall deadline for a single `Client::call`, covering argument
    /// upload and response download. The original implementation has no
    /// equivalent — a caller could block forever on a wedged server — so
    /// this is a supplemented safety net, not a spec requirement.
    pub call_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults_to_ten_second_deadlines() {
        let config = ServerConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(10));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert!(config.max_connections.is_none());
    }

    #[test]
    fn builder_methods_override_defaults() {
        let config = ClientConfig::new().with_call_timeout(Duration::from_secs(5));
        assert_eq!(config.call_timeout, Duration::from_secs(5));
    }
}
