//! Main entry point for soundrelayd
//!
//! Loads the persisted sessions, then keeps their engines available until
//! Ctrl+C, closing every engine on the way out.

mod cli;
mod logging;

use clap::Parser;
use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = cli.execute().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
