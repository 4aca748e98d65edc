//! Server configuration, built once at startup and handed to every component

use shared::{
    ConnectionOptions, WireFormat, DEFAULT_BUFFER_CAPACITY, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY,
};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub format: WireFormat,
    /// Receive ring size per connection
    pub buffer_capacity: usize,
    /// Messages buffered between a connection and its forwarding thread
    pub inbox_capacity: usize,
    /// Messages buffered for a screen before the router blocks on it
    pub outbox_capacity: usize,
    /// Events buffered in front of the router
    pub server_inbox_capacity: usize,
    /// Fixes the router's random choices, for reproducible runs
    pub rng_seed: Option<u64>,
    /// Interval of the built-in content feed, disabled when `None`
    pub feed_interval: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            format: WireFormat::default(),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            inbox_capacity: DEFAULT_QUEUE_CAPACITY,
            outbox_capacity: DEFAULT_QUEUE_CAPACITY,
            server_inbox_capacity: DEFAULT_QUEUE_CAPACITY * 4,
            rng_seed: None,
            feed_interval: None,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            format: self.format,
            buffer_capacity: self.buffer_capacity,
        }
    }
}
