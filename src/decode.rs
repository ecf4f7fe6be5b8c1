//! Symphonia-backed audio source.
//!
//! One probe-based implementation covers every registered container: the
//! file extension becomes a probe hint, packets are decoded into interleaved
//! `f32` samples, and seeks go through the format reader with the result
//! translated back into sample indices.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::{Time, TimeBase};

use crate::source::{DecodeState, Decoded, SampleFormat, Source, SourceBuilder};

/// Extensions the deck can load, each mapped to its source builder.
pub fn default_sources() -> BTreeMap<String, SourceBuilder> {
    let mut sources = BTreeMap::new();
    for ext in ["flac", "mp3", "ogg", "wav"] {
        sources.insert(
            ext.to_string(),
            Box::new(SymphoniaSource::build) as SourceBuilder,
        );
    }
    sources
}

pub struct SymphoniaSource {
    path: String,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: u8,
    sample_rate: u32,
    length: Option<u64>,
    time_base: Option<TimeBase>,
    at_eof: bool,
}

impl SymphoniaSource {
    /// Builder registered in the extensions map.
    pub fn build(path: &str) -> Result<Box<dyn Source>> {
        Ok(Box::new(Self::open(path)?))
    }

    pub fn open(path: &str) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("cannot open {path}"))?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .with_context(|| format!("cannot probe {path}"))?;

        let format = probed.format;
        let track = format
            .default_track()
            .ok_or_else(|| anyhow!("no audio track in {path}"))?;

        let channels = track
            .codec_params
            .channels
            .ok_or_else(|| anyhow!("unknown channel count in {path}"))?
            .count();
        let channels =
            u8::try_from(channels).map_err(|_| anyhow!("too many channels in {path}"))?;

        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| anyhow!("unknown sample rate in {path}"))?;

        let track_id = track.id;
        let length = track.codec_params.n_frames;
        let time_base = track.codec_params.time_base;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .with_context(|| format!("no codec for {path}"))?;

        Ok(Self {
            path: path.to_string(),
            format,
            decoder,
            track_id,
            channels,
            sample_rate,
            length,
            time_base,
            at_eof: false,
        })
    }

    fn samples_from_ts(&self, ts: u64) -> u64 {
        match self.time_base {
            Some(tb) => {
                let time = tb.calc_time(ts);
                let rate = f64::from(self.sample_rate);
                time.seconds * u64::from(self.sample_rate) + (time.frac * rate).round() as u64
            }
            // Without a time base, timestamps are already sample indices.
            None => ts,
        }
    }

    fn eof(&mut self) -> Decoded {
        self.at_eof = true;
        Decoded {
            state: DecodeState::Eof,
            bytes: Vec::new(),
        }
    }
}

impl Source for SymphoniaSource {
    fn decode(&mut self) -> Result<Decoded> {
        if self.at_eof {
            return Ok(self.eof());
        }

        let packet = loop {
            match self.format.next_packet() {
                Ok(p) if p.track_id() != self.track_id => continue,
                Ok(p) => break p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(self.eof());
                }
                Err(SymphoniaError::ResetRequired) => return Ok(self.eof()),
                Err(e) => return Err(e).context("read packet"),
            }
        };

        match self.decoder.decode(&packet) {
            Ok(decoded) => {
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                buf.copy_interleaved_ref(decoded);
                let mut bytes = Vec::with_capacity(buf.samples().len() * 4);
                for sample in buf.samples() {
                    bytes.extend_from_slice(&sample.to_ne_bytes());
                }
                Ok(Decoded {
                    state: DecodeState::Decoding,
                    bytes,
                })
            }
            // A corrupt packet is skipped; the next tick tries again.
            Err(SymphoniaError::DecodeError(_)) => Ok(Decoded {
                state: DecodeState::Decoding,
                bytes: Vec::new(),
            }),
            Err(e) => Err(e).context("decode packet"),
        }
    }

    fn seek(&mut self, samples: u64) -> Result<u64> {
        let target = match self.length {
            Some(len) if samples >= len => len.saturating_sub(1),
            _ => samples,
        };

        let time = Time::from(target as f64 / f64::from(self.sample_rate));
        let seeked = self
            .format
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .context("seek")?;

        self.decoder.reset();
        self.at_eof = false;

        Ok(self.samples_from_ts(seeked.actual_ts))
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn format(&self) -> SampleFormat {
        SampleFormat::F32
    }

    fn length_samples(&self) -> Option<u64> {
        self.length
    }

    fn path(&self) -> &str {
        &self.path
    }
}
