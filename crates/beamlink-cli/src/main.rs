//! Beamlink command-line interface
//!
//! Launches Erlang nodes under supervision and talks to them over the
//! Beamlink envelope protocol.
//!
//! # Commands
//!
//! - `beamlink launch`: start (or attach to) a node and open a console shell.
//!   Lines typed on stdin are forwarded to the node; its output is printed
//!   until stdin closes or Ctrl-C is pressed.
//! - `beamlink call M F [ARGS]`: launch a node, run one call, print the result.
//! - `beamlink config init|show|validate`: manage the configuration file.
//!
//! Set `RUST_LOG=beamlink_core=debug` for per-message logging.

mod args;
mod commands;
mod console;
mod logging;
mod router;

use clap::Parser;
use colored::Colorize;

pub use args::{Cli, Commands, ConfigAction};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = router::route(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
