//! Screen client configuration

use shared::{
    ConnectionOptions, WireFormat, DEFAULT_BUFFER_CAPACITY, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub format: WireFormat,
    /// Receive ring size
    pub buffer_capacity: usize,
    /// Events buffered between the connection thread and the tick loop
    pub inbox_capacity: usize,
    /// Simulation step of the local sky
    pub tick: Duration,
    /// Connection attempts after the first one fails
    pub connect_retries: u32,
    pub retry_delay: Duration,
    /// Fixes where objects entering from no particular edge appear
    pub rng_seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            format: WireFormat::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            inbox_capacity: DEFAULT_QUEUE_CAPACITY,
            tick: Duration::from_millis(16),
            connect_retries: 5,
            retry_delay: Duration::from_millis(500),
            rng_seed: None,
        }
    }
}

impl ClientConfig {
    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            format: self.format,
            buffer_capacity: self.buffer_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_targets_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr.port(), DEFAULT_PORT);
        assert!(config.server_addr.ip().is_loopback());
        assert_eq!(config.connection_options().format, WireFormat::Text);
    }
}
