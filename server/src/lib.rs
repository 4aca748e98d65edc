//! # Routing Server Library
//!
//! The authoritative side of a ring of screens sharing one sky. Screens
//! connect over TCP, objects (balloons and planes) drift across them, and
//! the server decides at every edge which screen owns an object next.
//!
//! ## Core Responsibilities
//!
//! ### Ownership Authority
//! Every object is owned by at most one screen at any instant. Only the
//! router thread reads or mutates the ownership map; connections merely
//! enqueue messages for it.
//!
//! ### Ring Topology
//! Screens form a circle in order of arrival. An object leaving a screen to
//! the right enters the next screen from its left edge, and the other way
//! round. A lone screen is its own neighbour.
//!
//! ### Recovery
//! When a screen disappears its objects are re-homed to the former
//! neighbours. With no screens left they become orphans and are adopted by
//! the next screen to connect.
//!
//! ## Architecture Design
//!
//! ### Single Routing Thread
//! One thread drains the server inbox and processes one event at a time,
//! which makes every ownership change linearizable without fine-grained
//! locking.
//!
//! ### Per-Screen Threads
//! Each screen gets a receive thread (inside its connection actor), a
//! forwarder tagging its messages with the screen ID, and a writer draining
//! the outbox the router fills. Every hand-off is a bounded queue, so a slow
//! screen stalls its own threads rather than growing memory. The router
//! never waits on an outbox: a screen that lets its outbox fill up is
//! dropped and its objects are re-homed.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Startup configuration shared by every component.
//!
//! ### Screen Module (`screen`)
//! Connected screens, their outboxes and owned objects, and the ring they
//! form.
//!
//! ### Router Module (`router`)
//! The routing state machine: new objects, screen changes, pops, metadata
//! replication, re-homing and orphan adoption.
//!
//! ### Network Module (`network`)
//! TCP listener and the threads linking each accepted socket to the router.
//!
//! ### Feed Module (`feed`)
//! Optional built-in source of new objects.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod feed;
pub mod network;
pub mod router;
pub mod screen;
