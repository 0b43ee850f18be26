//! Generate and verify user certificates from a session key secret.
//!
//! ```bash
//! # sign content.txt with secret.key, certificate goes to stdout
//! session-key-util secret.key content.txt > user.cert
//!
//! # verify a certificate
//! session-key-util --verify secret.key user.cert
//! ```

// this tool's whole purpose is stdout/stderr output
#![allow(clippy::print_stdout)]

use std::path::PathBuf;

use clap::Parser;
use padlink_server::SessionKey;

/// Session key certificate tool.
#[derive(Parser, Debug)]
struct Args {
    /// Verify a certificate instead of generating one.
    #[arg(short = 'd', long)]
    verify: bool,

    /// File containing the session key secret.
    secret_file: PathBuf,

    /// Content file to sign, or certificate file to verify.
    target_file: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let secret = std::fs::read(&args.secret_file)?;
    let key = SessionKey::new(secret);
    let target = std::fs::read_to_string(&args.target_file)?;

    if args.verify {
        match key.verify(&target) {
            Ok(_) => {
                println!("ok");
                Ok(())
            },
            Err(e) => {
                println!("fail: {e}");
                std::process::exit(1);
            },
        }
    } else {
        print!("{}", key.generate_certificate(&target));
        Ok(())
    }
}
