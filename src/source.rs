//! Decoder-facing contracts: sample formats and the audio source trait.
//!
//! A source is a pull-style decoder for exactly one file. The player builds
//! one per successful load via the extensions registry and hands it to the
//! pipeline, which owns it until eject or replacement.

use anyhow::Result;

/// PCM sample encodings a source may emit and a device may accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit.
    S16,
    /// Signed 32-bit.
    S32,
    /// 32-bit float.
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 => 4,
            SampleFormat::F32 => 4,
        }
    }
}

/// Whether a decode step produced more audio or hit the end of the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeState {
    /// The decoder is still working; `bytes` may be empty on a slow step.
    Decoding,
    /// The file is exhausted; any trailing bytes arrive in the same result.
    Eof,
}

/// The outcome of one decode step: zero or more interleaved PCM frames in
/// the source's output format, native-endian.
#[derive(Debug)]
pub struct Decoded {
    pub state: DecodeState,
    pub bytes: Vec<u8>,
}

/// A pull-style decoder for one loaded file.
///
/// Implementations do bounded, synchronous file I/O per decode step and are
/// only ever driven from the reactor thread. After a result with
/// [`DecodeState::Eof`], `decode` is not called again until a seek.
pub trait Source {
    /// Decode the next block of frames.
    fn decode(&mut self) -> Result<Decoded>;

    /// Seek to the given sample index, returning the index actually reached.
    /// Requests past the end are clamped, not rejected.
    fn seek(&mut self, samples: u64) -> Result<u64>;

    fn channels(&self) -> u8;

    fn sample_rate(&self) -> u32;

    fn format(&self) -> SampleFormat;

    /// Total length in samples, when the container knows it.
    fn length_samples(&self) -> Option<u64>;

    fn path(&self) -> &str;

    /// Bytes in one interleaved frame for all channels.
    fn bytes_per_frame(&self) -> usize {
        self.channels() as usize * self.format().bytes_per_sample()
    }

    fn micros_from_samples(&self, samples: u64) -> u64 {
        (u128::from(samples) * 1_000_000 / u128::from(self.sample_rate())) as u64
    }

    fn samples_from_micros(&self, micros: u64) -> u64 {
        (u128::from(micros) * u128::from(self.sample_rate()) / 1_000_000) as u64
    }

    fn length_micros(&self) -> Option<u64> {
        self.length_samples().map(|s| self.micros_from_samples(s))
    }
}

/// Builds a source for a path; one is registered per file extension.
pub type SourceBuilder = Box<dyn Fn(&str) -> Result<Box<dyn Source>>>;
