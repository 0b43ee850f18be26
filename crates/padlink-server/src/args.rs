//! Shared CLI surface of the broker binaries.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{
    activation::ActivationConfig,
    error::ServerError,
    runtime::RuntimeConfig,
    session_key::SessionKey,
    transport::TlsSettings,
};

/// Command-line arguments common to both brokers.
#[derive(Parser, Debug)]
pub struct ServerArgs {
    /// Port number to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// File containing the HMAC session key secret; enables certificate
    /// verification.
    #[arg(short = 'k', long = "key")]
    pub key: Option<PathBuf>,

    /// External executable run with the certificate content as its first
    /// argument; must exit 0 for activation to succeed.
    #[arg(short = 'c', long = "cert-verifier")]
    pub cert_verifier: Option<PathBuf>,

    /// TLS certificate file (PEM).
    #[arg(long = "ssl-cert", alias = "sc")]
    pub ssl_cert: Option<PathBuf>,

    /// TLS private key file (PEM).
    #[arg(long = "ssl-key", alias = "sk")]
    pub ssl_key: Option<PathBuf>,

    /// Dump every packet to the log.
    #[arg(long)]
    pub dump_packets: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerArgs {
    /// Install the tracing subscriber (`RUST_LOG` wins over `--log-level`).
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&self.log_level));
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }

    /// Bind address including the port (`default_port` when `-p` absent).
    #[must_use]
    pub fn bind_address(&self, default_port: u16) -> String {
        format!("{}:{}", self.bind, self.port.unwrap_or(default_port))
    }

    /// Activation policy from `--key`/`--cert-verifier`.
    pub fn activation_config(&self) -> Result<ActivationConfig, ServerError> {
        let session_key = match &self.key {
            Some(path) => {
                let secret = std::fs::read(path).map_err(|e| {
                    ServerError::Config(format!(
                        "failed to read key file '{}': {e}",
                        path.display()
                    ))
                })?;
                Some(SessionKey::new(secret))
            },
            None => None,
        };
        if session_key.is_none() && self.cert_verifier.is_some() {
            return Err(ServerError::Config(
                "--cert-verifier needs --key to be set".to_owned(),
            ));
        }
        Ok(ActivationConfig { session_key, verifier: self.cert_verifier.clone() })
    }

    /// Runtime settings from the TLS/debug flags.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        let tls = match (&self.ssl_cert, &self.ssl_key) {
            (Some(cert), Some(key)) => {
                Some(TlsSettings { cert_path: cert.clone(), key_path: key.clone() })
            },
            _ => None,
        };
        RuntimeConfig {
            tls,
            verifier: self.cert_verifier.clone(),
            dump_packets: self.dump_packets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_used_when_unset() {
        let args = ServerArgs::parse_from(["peer-linker"]);
        assert_eq!(args.bind_address(8080), "0.0.0.0:8080");
    }

    #[test]
    fn explicit_port_wins() {
        let args = ServerArgs::parse_from(["peer-linker", "-p", "9000"]);
        assert_eq!(args.bind_address(8080), "0.0.0.0:9000");
    }

    #[test]
    fn verifier_without_key_is_rejected() {
        let args = ServerArgs::parse_from(["peer-linker", "-c", "/bin/true"]);
        assert!(args.activation_config().is_err());
    }

    #[test]
    fn ssl_aliases_parse() {
        let args =
            ServerArgs::parse_from(["peer-linker", "--sc", "cert.pem", "--sk", "key.pem"]);
        assert!(args.runtime_config().tls.is_some());
    }
}
