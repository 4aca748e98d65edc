use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use shared::{WireFormat, DEFAULT_BUFFER_CAPACITY, DEFAULT_PORT, DEFAULT_QUEUE_CAPACITY};
use std::time::Duration;

/// Routes balloons and planes across a ring of connected screens.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Wire encoding spoken by every screen (text or binary)
    #[clap(short, long, default_value = "text")]
    format: WireFormat,
    /// Receive buffer per connection, in bytes
    #[clap(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    buffer_size: usize,
    /// Capacity of the per-screen inbox and outbox queues
    #[clap(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_size: usize,
    /// Seed for the router's random choices
    #[clap(long)]
    seed: Option<u64>,
    /// Inject a new object every N milliseconds
    #[clap(long)]
    feed_interval_ms: Option<u64>,
}

/// Parses command-line arguments, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        format: args.format,
        buffer_capacity: args.buffer_size,
        inbox_capacity: args.queue_size,
        outbox_capacity: args.queue_size,
        server_inbox_capacity: args.queue_size * 4,
        rng_seed: args.seed,
        feed_interval: args.feed_interval_ms.map(Duration::from_millis),
    };

    let server = Server::bind(config).await?;
    let handle = server.handle();
    let running = tokio::spawn(server.run());

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, shutting down gracefully...");
    handle.shutdown();

    running.await??;
    Ok(())
}
