//! # Screen Client Library
//!
//! A headless screen in the ring. It connects to the routing server,
//! receives the objects the server hands it, lets them drift across a
//! normalized viewport and reports every object that leaves through the
//! left or right edge so the server can pass it on.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Server address, wire format, queue sizes, tick rate and retry policy.
//!
//! ### Sky Module (`sky`)
//! The objects this screen currently owns:
//! - Entry position from the edge an object arrives through
//! - Drift by velocity every tick and edge detection
//! - Cached balloon content and state
//!
//! ### Network Module (`network`)
//! The connection actor plus the tick loop:
//! - Connection events are queued by the connection thread
//! - Each tick drains them in one batch, so the loop never waits on the
//!   network
//! - Connect failures are retried a configured number of times
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::ScreenClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let mut client = ScreenClient::new(ClientConfig::default());
//!     client.run().await
//! }
//! ```

pub mod config;
pub mod network;
pub mod sky;
