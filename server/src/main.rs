use clap::Parser;
use env_logger::Env;
use log::{error, info};
use server::{Server, ServerConfig};
use shared::{CodecConfig, DEFAULT_HOST, DEFAULT_PORT};
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind to
    #[clap(short = 'H', long, default_value = DEFAULT_HOST)]
    host: String,
    /// Port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Simulation updates per second
    #[clap(short, long, default_value = "60")]
    tick_rate: u32,
    /// Snapshot broadcasts per second
    #[clap(short, long, default_value = "60")]
    sync_rate: u32,
    /// Seconds between a host leaving and the server closing
    #[clap(long, default_value = "3.0")]
    grace: f64,
    /// Messages above this many bytes are compressed
    #[clap(long, default_value = "500")]
    compression_threshold: usize,
    /// Frames above this many bytes are chunked
    #[clap(long, default_value = "1400")]
    max_packet_size: usize,
    /// Base64 characters per chunk
    #[clap(long, default_value = "1200")]
    chunk_size: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            tick_rate: args.tick_rate,
            sync_rate: args.sync_rate,
            shutdown_grace: Duration::from_secs_f64(args.grace.max(0.0)),
            codec: CodecConfig {
                compression_threshold: args.compression_threshold,
                max_packet_size: args.max_packet_size,
                chunk_size: args.chunk_size,
            },
        }
    }
}

/// Parses arguments, binds the listener and runs until the room closes or Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());
    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start server: {}", e);
            return Err(e.into());
        }
    };

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            shutdown.trigger();
        }
    });

    server.run().await?;
    Ok(())
}
