use clap::Parser;
use log::info;
use server::network::{BoxError, Server, ServerConfig};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Maximum number of concurrent connections
    #[arg(short, long, default_value = "256")]
    max_clients: usize,

    /// Seconds of silence before a connection is dropped
    #[arg(long, default_value = "10")]
    client_timeout_secs: u64,

    /// Seed for the dice; omit for a random seed
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting Superfarmer server...");
    if let Some(seed) = args.seed {
        info!("Dice seed: {}", seed);
    }

    let mut server = Server::new(ServerConfig {
        addr: format!("{}:{}", args.host, args.port),
        max_clients: args.max_clients,
        client_timeout: Duration::from_secs(args.client_timeout_secs),
        seed: args.seed,
    })
    .await?;

    server.run().await?;

    Ok(())
}
