use clap::Parser;
use client::config::ClientConfig;
use client::network::ScreenClient;
use log::info;
use shared::{WireFormat, DEFAULT_BUFFER_CAPACITY, DEFAULT_QUEUE_CAPACITY};
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:4567")]
    server: SocketAddr,

    /// Wire encoding spoken by the server (text or binary)
    #[arg(short = 'f', long, default_value = "text")]
    format: WireFormat,

    /// Receive buffer in bytes
    #[arg(long, default_value_t = DEFAULT_BUFFER_CAPACITY)]
    buffer_size: usize,

    /// Capacity of the incoming event queue
    #[arg(long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_size: usize,

    /// Simulation tick in milliseconds
    #[arg(short = 't', long, default_value = "16")]
    tick_ms: u64,

    /// Connection attempts after the first failure
    #[arg(short = 'r', long, default_value = "5")]
    retries: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting screen...");
    let config = ClientConfig {
        server_addr: args.server,
        format: args.format,
        buffer_capacity: args.buffer_size,
        inbox_capacity: args.queue_size,
        tick: Duration::from_millis(args.tick_ms),
        connect_retries: args.retries,
        ..ClientConfig::default()
    };

    let mut client = ScreenClient::new(config);
    client.run().await?;

    info!("Screen stopped");
    Ok(())
}
