//! Server configuration

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::config::{duration_secs, MIN_INTERVAL};
use crate::media::DEFAULT_MTU;

/// Server configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address of the handshake-dialect (FTL) control listener
    pub handshake_addr: SocketAddr,

    /// Address of the message-dialect (RTMP) listener
    pub message_addr: SocketAddr,

    /// Interface media ports are bound on
    pub media_bind_ip: IpAddr,

    /// Maximum concurrent connections per listener (0 = unlimited)
    pub max_connections: usize,

    /// Time a handshake session may go without media before it is closed
    #[serde(with = "duration_secs")]
    pub session_timeout: Duration,

    /// Interval of the per-connection sampler
    #[serde(with = "duration_secs")]
    pub sample_interval: Duration,

    /// Output bytes per sample window at which a connection is cut off
    pub bandwidth_limit: u64,

    /// Consecutive metadata delivery failures tolerated per connection
    pub metadata_failure_limit: u32,

    /// Maximum payload size of outgoing RTP packets
    pub mtu: usize,

    /// Receive buffer for inbound media datagrams
    pub media_read_buffer: usize,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let any = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        Self {
            handshake_addr: SocketAddr::new(any, 8084),
            message_addr: SocketAddr::new(any, 1935),
            media_bind_ip: any,
            max_connections: 0, // Unlimited
            session_timeout: Duration::from_secs(5 * 60),
            sample_interval: Duration::from_secs(5),
            bandwidth_limit: 8_000_000,
            metadata_failure_limit: 5,
            mtu: DEFAULT_MTU,
            media_read_buffer: 1600,
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ServerConfig {
    /// Config listening on loopback ephemeral ports
    pub fn local() -> Self {
        let loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            handshake_addr: SocketAddr::new(loopback, 0),
            message_addr: SocketAddr::new(loopback, 0),
            media_bind_ip: loopback,
            ..Default::default()
        }
    }

    /// Set the handshake-dialect listen address
    pub fn handshake_addr(mut self, addr: SocketAddr) -> Self {
        self.handshake_addr = addr;
        self
    }

    /// Set the message-dialect listen address
    pub fn message_addr(mut self, addr: SocketAddr) -> Self {
        self.message_addr = addr;
        self
    }

    /// Set the interface media ports are bound on
    pub fn media_bind_ip(mut self, ip: IpAddr) -> Self {
        self.media_bind_ip = ip;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the handshake session timeout
    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }

    /// Set the sampler interval
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval.max(MIN_INTERVAL);
        self
    }

    /// Set the per-window bandwidth ceiling in bytes
    pub fn bandwidth_limit(mut self, bytes: u64) -> Self {
        self.bandwidth_limit = bytes;
        self
    }

    /// Set the outgoing RTP MTU
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.handshake_addr.port(), 8084);
        assert_eq!(config.message_addr.port(), 1935);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.session_timeout, Duration::from_secs(300));
        assert_eq!(config.mtu, 1392);
        assert!(config.tcp_nodelay);
    }

    #[test]
    fn test_builder() {
        let config = ServerConfig::local()
            .max_connections(10)
            .bandwidth_limit(1000)
            .session_timeout(Duration::from_secs(1));

        assert!(config.handshake_addr.ip().is_loopback());
        assert_eq!(config.handshake_addr.port(), 0);
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.bandwidth_limit, 1000);
        assert_eq!(config.session_timeout, Duration::from_secs(1));
    }
}
