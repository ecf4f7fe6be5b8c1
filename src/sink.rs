//! Audio sinks: the playback end of the pipeline.
//!
//! A sink owns the output side of the ring buffer and a realtime callback
//! that drains it into the device. The callback shares exactly three things
//! with the reactor thread: the ring, the frames-consumed counter, and the
//! state word (plus the source-out flag that lets it detect the drain to
//! AT_END). Everything else on the sink is only touched while the callback
//! is stopped.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::SizedSample;

use crate::device;
use crate::ring::RingBuffer;
use crate::source::{SampleFormat, Source};

/// Frames of headroom in the sink's ring buffer.
const RING_FRAMES: usize = 1 << 16;

/// Scratch buffer carried by the callback so it never allocates.
const SCRATCH_BYTES: usize = 32 * 1024;

/// Playback states of a sink. The "no sink at all" case is represented by
/// the player's absent pipeline, not by a state here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    /// Loaded but not playing.
    Stopped = 0,
    /// The callback is live and consuming the ring.
    Playing = 1,
    /// The source is out and the ring has drained.
    AtEnd = 2,
    /// The output stream died; the player ejects on observation.
    Failed = 3,
}

impl SinkState {
    fn from_u8(raw: u8) -> SinkState {
        match raw {
            0 => SinkState::Stopped,
            1 => SinkState::Playing,
            2 => SinkState::AtEnd,
            _ => SinkState::Failed,
        }
    }
}

/// The playback end of an audio pipeline.
pub trait Sink {
    /// Start or resume the callback.
    fn start(&mut self) -> Result<()>;

    /// Pause the callback.
    fn stop(&mut self) -> Result<()>;

    fn state(&self) -> SinkState;

    /// Frames delivered to the device since the last `set_position`, offset
    /// by that position; effectively the absolute playback sample index.
    fn position(&self) -> u64;

    /// Rebase the consumed counter after a seek and flush the ring.
    /// Only legal while the sink is not playing.
    fn set_position(&mut self, samples: u64);

    /// Signal that no more input is coming; once the ring drains the sink
    /// transitions to [`SinkState::AtEnd`].
    fn source_out(&mut self);

    /// Offer bytes to the ring, returning how many were accepted.
    fn transfer(&mut self, bytes: &[u8]) -> usize;
}

/// Builds a sink for a source's format descriptor and a device id.
pub type SinkBuilder = Box<dyn Fn(&dyn Source, usize) -> Result<Box<dyn Sink>>>;

/// State shared with the realtime callback.
struct SinkShared {
    state: AtomicU8,
    frames: AtomicU64,
    source_out: AtomicBool,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SinkState::Stopped as u8),
            frames: AtomicU64::new(0),
            source_out: AtomicBool::new(false),
        }
    }

    fn state(&self) -> SinkState {
        SinkState::from_u8(self.state.load(Ordering::Acquire))
    }
}

/// A cpal-backed sink playing on one output device.
pub struct DeviceSink {
    stream: cpal::Stream,
    ring: Arc<RingBuffer>,
    shared: Arc<SinkShared>,
}

impl DeviceSink {
    /// Builder handed to the player: opens the device stream for the
    /// source's native rate, channel count, and sample format.
    pub fn build(source: &dyn Source, device_id: usize) -> Result<Box<dyn Sink>> {
        let host = cpal::default_host();
        let dev = device::output_device(&host, device_id)?;

        let channels = u16::from(source.channels());
        let rate = source.sample_rate();
        let format = source.format();
        ensure_supported(&dev, channels, rate, format)?;

        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let frame_bytes = source.bytes_per_frame();
        let ring = Arc::new(RingBuffer::with_capacity(RING_FRAMES * frame_bytes));
        let shared = Arc::new(SinkShared::new());

        let stream = match format {
            SampleFormat::U8 => {
                build_stream::<u8>(&dev, &config, ring.clone(), shared.clone(), frame_bytes)
            }
            SampleFormat::S16 => {
                build_stream::<i16>(&dev, &config, ring.clone(), shared.clone(), frame_bytes)
            }
            SampleFormat::S32 => {
                build_stream::<i32>(&dev, &config, ring.clone(), shared.clone(), frame_bytes)
            }
            SampleFormat::F32 => {
                build_stream::<f32>(&dev, &config, ring.clone(), shared.clone(), frame_bytes)
            }
        }?;

        // Streams may come up running on some backends.
        stream.pause().context("pause fresh output stream")?;

        Ok(Box::new(DeviceSink {
            stream,
            ring,
            shared,
        }))
    }
}

impl Sink for DeviceSink {
    fn start(&mut self) -> Result<()> {
        self.stream.play().context("start output stream")?;
        if self.shared.state() == SinkState::Stopped {
            self.shared
                .state
                .store(SinkState::Playing as u8, Ordering::Release);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stream.pause().context("pause output stream")?;
        if self.shared.state() == SinkState::Playing {
            self.shared
                .state
                .store(SinkState::Stopped as u8, Ordering::Release);
        }
        Ok(())
    }

    fn state(&self) -> SinkState {
        self.shared.state()
    }

    fn position(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    fn set_position(&mut self, samples: u64) {
        debug_assert_ne!(self.shared.state(), SinkState::Playing);
        self.ring.flush();
        self.shared.source_out.store(false, Ordering::Release);
        self.shared.frames.store(samples, Ordering::Release);
        if self.shared.state() != SinkState::Failed {
            self.shared
                .state
                .store(SinkState::Stopped as u8, Ordering::Release);
        }
    }

    fn source_out(&mut self) {
        self.shared.source_out.store(true, Ordering::Release);
    }

    fn transfer(&mut self, bytes: &[u8]) -> usize {
        self.ring.write(bytes)
    }
}

/// Samples the callback can reconstruct from ring bytes.
trait RingSample: SizedSample {
    fn from_ring_bytes(bytes: &[u8]) -> Self;
}

impl RingSample for u8 {
    fn from_ring_bytes(bytes: &[u8]) -> Self {
        bytes[0]
    }
}

impl RingSample for i16 {
    fn from_ring_bytes(bytes: &[u8]) -> Self {
        i16::from_ne_bytes([bytes[0], bytes[1]])
    }
}

impl RingSample for i32 {
    fn from_ring_bytes(bytes: &[u8]) -> Self {
        i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

impl RingSample for f32 {
    fn from_ring_bytes(bytes: &[u8]) -> Self {
        f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }
}

fn ensure_supported(
    dev: &cpal::Device,
    channels: u16,
    rate: u32,
    format: SampleFormat,
) -> Result<()> {
    let wanted = match format {
        SampleFormat::U8 => cpal::SampleFormat::U8,
        SampleFormat::S16 => cpal::SampleFormat::I16,
        SampleFormat::S32 => cpal::SampleFormat::I32,
        SampleFormat::F32 => cpal::SampleFormat::F32,
    };

    let supported = dev
        .supported_output_configs()
        .context("query output configs")?
        .any(|range| {
            range.channels() == channels
                && range.sample_format() == wanted
                && range.min_sample_rate().0 <= rate
                && rate <= range.max_sample_rate().0
        });

    if !supported {
        return Err(anyhow!(
            "device does not accept {channels}ch {rate}Hz {format:?}"
        ));
    }
    Ok(())
}

fn build_stream<T: RingSample>(
    dev: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: Arc<RingBuffer>,
    shared: Arc<SinkShared>,
    frame_bytes: usize,
) -> Result<cpal::Stream> {
    let mut scratch = vec![0u8; SCRATCH_BYTES];
    let err_shared = shared.clone();

    let stream = dev
        .build_output_stream(
            config,
            move |data: &mut [T], _| render(data, &ring, &shared, &mut scratch, frame_bytes),
            move |err| {
                tracing::warn!("output stream error: {err}");
                err_shared
                    .state
                    .store(SinkState::Failed as u8, Ordering::Release);
            },
            None,
        )
        .context("build output stream")?;

    Ok(stream)
}

/// One callback round: drain whole frames from the ring into `data`,
/// zero-fill anything left over, and flip to AT_END once the source is out
/// and the ring is dry. Wait-free, allocation-free.
fn render<T: RingSample>(
    data: &mut [T],
    ring: &RingBuffer,
    shared: &SinkShared,
    scratch: &mut [u8],
    frame_bytes: usize,
) {
    if shared.state() != SinkState::Playing {
        for sample in data.iter_mut() {
            *sample = T::EQUILIBRIUM;
        }
        return;
    }

    let sample_bytes = std::mem::size_of::<T>();
    let mut filled = 0usize;

    while filled < data.len() {
        let want = ((data.len() - filled) * sample_bytes).min(scratch.len());
        let take = want.min(ring.read_capacity());
        let take = take - take % frame_bytes;
        if take == 0 {
            break;
        }

        let got = ring.read(&mut scratch[..take]);
        for i in 0..got / sample_bytes {
            data[filled + i] = T::from_ring_bytes(&scratch[i * sample_bytes..(i + 1) * sample_bytes]);
        }
        filled += got / sample_bytes;
        shared
            .frames
            .fetch_add((got / frame_bytes) as u64, Ordering::AcqRel);
    }

    if filled < data.len() {
        for sample in &mut data[filled..] {
            *sample = T::EQUILIBRIUM;
        }
        if shared.source_out.load(Ordering::Acquire) && ring.read_capacity() == 0 {
            shared
                .state
                .store(SinkState::AtEnd as u8, Ordering::Release);
        }
    }
}
