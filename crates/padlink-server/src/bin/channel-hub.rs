//! Channel-Hub broker binary.
//!
//! # Usage
//!
//! ```bash
//! # plain TCP on the default port 8081
//! channel-hub
//!
//! # with HMAC certificate checking
//! channel-hub -k session.key -c ./verify-cert
//! ```

use clap::Parser;
use padlink_server::{ActivationConfig, ChannelHubDriver, Server, args::ServerArgs};

const DEFAULT_PORT: u16 = 8081;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    args.init_tracing();

    let activation: ActivationConfig = args.activation_config()?;
    let driver = ChannelHubDriver::new(activation);

    let server =
        Server::bind(&args.bind_address(DEFAULT_PORT), driver, args.runtime_config()).await?;
    tracing::info!("channel-hub ready on {}", server.local_addr()?);

    server.run().await?;
    Ok(())
}
