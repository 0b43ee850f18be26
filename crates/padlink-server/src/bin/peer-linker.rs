//! Peer-Linker broker binary.
//!
//! # Usage
//!
//! ```bash
//! # plain TCP on the default port 8080
//! peer-linker
//!
//! # with HMAC certificate checking and TLS
//! peer-linker -p 8080 -k session.key --ssl-cert cert.pem --ssl-key key.pem
//! ```

use clap::Parser;
use padlink_server::{ActivationConfig, PeerLinkerDriver, Server, args::ServerArgs};

const DEFAULT_PORT: u16 = 8080;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();
    args.init_tracing();

    let activation: ActivationConfig = args.activation_config()?;
    let driver = PeerLinkerDriver::new(activation);

    let server =
        Server::bind(&args.bind_address(DEFAULT_PORT), driver, args.runtime_config()).await?;
    tracing::info!("peer-linker ready on {}", server.local_addr()?);

    server.run().await?;
    Ok(())
}
