//! Command-line surface.

use clap::Parser;

use crate::net::{DEFAULT_HOST, DEFAULT_PORT};

/// Headless audio deck daemon driven by a line-oriented TCP protocol.
#[derive(Parser, Debug)]
#[command(name = "deckd", version)]
pub struct Args {
    /// Output device ID, as printed in the device listing
    pub device_id: usize,

    /// IP host to bind the control socket to
    #[arg(default_value = DEFAULT_HOST)]
    pub host: String,

    /// TCP port to bind the control socket to
    #[arg(default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
