//! deckd — a headless audio deck driven over TCP.
//!
//! One loaded file, one output device, any number of connected operators.
//! The control protocol is line-oriented text: clients send tagged commands
//! (`load`, `play`, `stop`, `pos`, `eject`, `end`, `dump`, `quit`) and
//! receive tagged acknowledgements plus `!`-tagged state broadcasts.
//!
//! ## Structure
//! - `ring`: lock-free SPSC byte buffer between decode and playback.
//! - `source` / `decode`: the pull-decoder contract and its Symphonia
//!   implementation.
//! - `sink`: the CPAL output stream draining the ring in its callback.
//! - `pipeline`: couples one source to one sink, one step per tick.
//! - `player`: the command state machine over an optional pipeline.
//! - `net`: the reactor multiplexing client connections with the update
//!   tick.

mod cli;
mod decode;
mod device;
mod error;
mod net;
mod pipeline;
mod player;
mod response;
mod ring;
mod sink;
mod source;
#[cfg(test)]
mod testutil;
mod tokeniser;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::net::Reactor;
use crate::player::Player;
use crate::sink::DeviceSink;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match cli::Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            use clap::error::ErrorKind;
            if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                e.exit();
            }
            eprintln!("{e}");
            return exit_with_usage();
        }
    };

    let host = cpal::default_host();
    if device::output_device(&host, args.device_id).is_err() {
        eprintln!("not a valid output device: {}", args.device_id);
        return exit_with_usage();
    }

    let player = Player::new(
        args.device_id,
        Box::new(DeviceSink::build),
        decode::default_sources(),
    );
    let mut reactor = Reactor::new(player);

    if let Err(e) = reactor.run(&args.host, args.port) {
        tracing::error!("network error: {e:#}");
        eprintln!("Is {}:{} available?", args.host, args.port);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print usage plus the output-device enumeration, and fail.
fn exit_with_usage() -> ExitCode {
    eprintln!("usage: deckd DEVICE_ID [HOST] [PORT]");
    eprintln!("where DEVICE_ID is one of the following:");
    match device::list_output_devices(&cpal::default_host()) {
        Ok(devices) => {
            for (id, name) in devices {
                eprintln!("\t{id}: {name}");
            }
        }
        Err(e) => eprintln!("\t(no output devices: {e})"),
    }
    eprintln!("default HOST: {}", net::DEFAULT_HOST);
    eprintln!("default PORT: {}", net::DEFAULT_PORT);
    ExitCode::FAILURE
}
