//! textmorph: a TCP text transformation server.
//!
//! Speaks a binary length-delimited protocol: each request is a 32-bit
//! big-endian header (top 5 bits opcode, bottom 27 bits payload byte
//! length) followed by the UTF-8 payload. Each reply is a 32-bit
//! big-endian length followed by the transformed text.
//!
//! Supported transformations:
//! - 1: uppercase
//! - 2: lowercase
//! - 4: reverse
//! - 8: shuffle
//! - 16: random mutate (drop/repeat characters at random)

mod config;
mod decoder;
mod frame;
mod server;
mod transform;

use config::Config;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        "Starting textmorph server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::new(config);
        tokio::select! {
            result = server.run() => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                Ok(())
            }
        }
    })
}
