//! Output device discovery and selection.
//!
//! Thin wrappers around CPAL. Devices are addressed by their index in the
//! host's output-device enumeration, which is also what the usage listing
//! prints; input-only devices never appear in it.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait};

/// Pick the output device at the given enumeration index.
pub fn output_device(host: &cpal::Host, id: usize) -> Result<cpal::Device> {
    host.output_devices()
        .context("no output devices")?
        .nth(id)
        .ok_or_else(|| anyhow!("no output device with id {id}"))
}

/// Output devices as `(id, name)` pairs, for the usage listing.
pub fn list_output_devices(host: &cpal::Host) -> Result<Vec<(usize, String)>> {
    let devices = host.output_devices().context("no output devices")?;
    let mut out = Vec::new();
    for (id, device) in devices.enumerate() {
        let name = device.name().unwrap_or_else(|_| "unknown".to_string());
        out.push((id, name));
    }
    Ok(out)
}
