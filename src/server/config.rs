//! Server configuration

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::wire::constants::DEFAULT_MAX_MESSAGE_SIZE;

pub const DEFAULT_TCP_PORT: u16 = 10001;
pub const DEFAULT_UDP_PORT: u16 = 10002;
pub const DEFAULT_UNIX_PATH: &str = "/tmp/svcstream.socket";

/// Server configuration options
///
/// A listener whose address is `None` is not started.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP stream listener
    pub tcp_addr: Option<SocketAddr>,

    /// UDP datagram listener
    pub udp_addr: Option<SocketAddr>,

    /// Unix stream socket path
    pub unix_path: Option<PathBuf>,

    /// Permission bits applied to the Unix socket file
    pub unix_mode: u32,

    /// Maximum concurrent stream connections (0 = unlimited)
    pub max_connections: usize,

    /// Bytes requested per socket read
    pub read_buffer_size: usize,

    /// Largest accepted inbound message
    pub max_message_size: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tcp_addr: Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_TCP_PORT))),
            udp_addr: Some(SocketAddr::from(([0, 0, 0, 0], DEFAULT_UDP_PORT))),
            unix_path: Some(PathBuf::from(DEFAULT_UNIX_PATH)),
            unix_mode: 0o666,
            max_connections: 0, // Unlimited
            read_buffer_size: 4096,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tcp_nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Config with no listeners enabled
    pub fn none() -> Self {
        Self {
            tcp_addr: None,
            udp_addr: None,
            unix_path: None,
            ..Default::default()
        }
    }

    /// Listen for TCP streams on `addr`
    pub fn tcp(mut self, addr: SocketAddr) -> Self {
        self.tcp_addr = Some(addr);
        self
    }

    /// Listen for datagrams on `addr`
    pub fn udp(mut self, addr: SocketAddr) -> Self {
        self.udp_addr = Some(addr);
        self
    }

    /// Listen for Unix streams at `path`
    pub fn unix(mut self, path: impl Into<PathBuf>) -> Self {
        self.unix_path = Some(path.into());
        self
    }

    pub fn disable_tcp(mut self) -> Self {
        self.tcp_addr = None;
        self
    }

    pub fn disable_udp(mut self) -> Self {
        self.udp_addr = None;
        self
    }

    pub fn disable_unix(mut self) -> Self {
        self.unix_path = None;
        self
    }

    /// Set the Unix socket file mode
    pub fn unix_mode(mut self, mode: u32) -> Self {
        self.unix_mode = mode;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the per-read buffer size
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Set the largest accepted inbound message
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.tcp_addr.unwrap().port(), 10001);
        assert_eq!(config.udp_addr.unwrap().port(), 10002);
        assert_eq!(config.unix_path.unwrap(), PathBuf::from("/tmp/svcstream.socket"));
        assert_eq!(config.unix_mode, 0o666);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.max_message_size, 64 * 1024);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_none_disables_listeners() {
        let config = ServerConfig::none();

        assert!(config.tcp_addr.is_none());
        assert!(config.udp_addr.is_none());
        assert!(config.unix_path.is_none());
        assert_eq!(config.read_buffer_size, 4096);
    }

    #[test]
    fn test_builder_disable() {
        let config = ServerConfig::default().disable_udp().disable_unix();

        assert!(config.tcp_addr.is_some());
        assert!(config.udp_addr.is_none());
        assert!(config.unix_path.is_none());
    }

    #[test]
    fn test_builder_read_buffer_size_floor() {
        let config = ServerConfig::default().read_buffer_size(0);

        assert_eq!(config.read_buffer_size, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let config = ServerConfig::none()
            .tcp(addr)
            .unix("/run/robot.sock")
            .unix_mode(0o600)
            .max_connections(8)
            .max_message_size(1024)
            .tcp_nodelay(false);

        assert_eq!(config.tcp_addr, Some(addr));
        assert_eq!(config.unix_path, Some(PathBuf::from("/run/robot.sock")));
        assert_eq!(config.unix_mode, 0o600);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.max_message_size, 1024);
        assert!(!config.tcp_nodelay);
    }
}
