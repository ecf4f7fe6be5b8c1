//! Shared test doubles for the pipeline and player.
//!
//! Both fakes write their observable effects into one shared [`Probe`], so a
//! test can watch the whole pipeline through a single handle even after the
//! player has swallowed (or ejected) the source and sink that produced the
//! effects.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;

use crate::sink::{Sink, SinkState};
use crate::source::{DecodeState, Decoded, SampleFormat, Source};

struct ProbeState {
    // Sink side.
    queued: VecDeque<u8>,
    room: usize,
    state: SinkState,
    frames_consumed: u64,
    source_out: bool,
    flushed: bool,
    stop_seen: bool,
    stopped_before_set_position: bool,
    // Source side.
    decode_requests: usize,
    seeks: Vec<u64>,
}

impl Default for ProbeState {
    fn default() -> Self {
        Self {
            queued: VecDeque::new(),
            room: 0,
            state: SinkState::Stopped,
            frames_consumed: 0,
            source_out: false,
            flushed: false,
            stop_seen: false,
            stopped_before_set_position: false,
            decode_requests: 0,
            seeks: Vec::new(),
        }
    }
}

/// Shared window into a [`ScriptSource`] / [`FakeSink`] pair.
#[derive(Clone, Default)]
pub struct Probe(Arc<Mutex<ProbeState>>);

impl Probe {
    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.0.lock().unwrap()
    }

    /// Bytes currently queued in the fake sink.
    pub fn accepted(&self) -> Vec<u8> {
        self.lock().queued.iter().copied().collect()
    }

    /// Remove `n` queued bytes, freeing sink room, without advancing the
    /// consumed counter.
    pub fn drain(&self, n: usize) {
        let mut st = self.lock();
        for _ in 0..n {
            st.queued.pop_front();
        }
        st.room += n;
    }

    pub fn drain_all(&self) {
        let n = self.lock().queued.len();
        self.drain(n);
    }

    /// Pretend the callback delivered `frames` frames to the device.
    pub fn consume_frames(&self, frames: u64) {
        let mut st = self.lock();
        st.frames_consumed += frames;
        let n = st.queued.len();
        st.queued.clear();
        st.room += n;
    }

    pub fn decode_requests(&self) -> usize {
        self.lock().decode_requests
    }

    pub fn seeks(&self) -> Vec<u64> {
        self.lock().seeks.clone()
    }

    pub fn source_out_signalled(&self) -> bool {
        self.lock().source_out
    }

    pub fn flushed(&self) -> bool {
        self.lock().flushed
    }

    pub fn stopped_before_set_position(&self) -> bool {
        self.lock().stopped_before_set_position
    }

    /// Force the fake sink's state word, as the error callback would.
    pub fn fail_sink(&self) {
        self.lock().state = SinkState::Failed;
    }
}

/// A scripted decoder: plays back a fixed list of decode results, then
/// reports EOF forever. Seeks clamp against the declared length but do not
/// rewind the script.
pub struct ScriptSource {
    probe: Probe,
    rate: u32,
    channels: u8,
    format: SampleFormat,
    length: Option<u64>,
    steps: VecDeque<(DecodeState, Vec<u8>)>,
    path: String,
}

impl ScriptSource {
    pub fn new(
        probe: &Probe,
        rate: u32,
        channels: u8,
        format: SampleFormat,
        length: Option<u64>,
        steps: Vec<(DecodeState, Vec<u8>)>,
    ) -> Self {
        Self {
            probe: probe.clone(),
            rate,
            channels,
            format,
            length,
            steps: steps.into(),
            path: "/tmp/script.wav".to_string(),
        }
    }

    /// Report this path from [`Source::path`], as a real decoder would.
    pub fn at_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }
}

impl Source for ScriptSource {
    fn decode(&mut self) -> Result<Decoded> {
        self.probe.lock().decode_requests += 1;
        let (state, bytes) = self
            .steps
            .pop_front()
            .unwrap_or((DecodeState::Eof, Vec::new()));
        Ok(Decoded { state, bytes })
    }

    fn seek(&mut self, samples: u64) -> Result<u64> {
        let actual = match self.length {
            Some(len) if samples >= len => len.saturating_sub(1),
            _ => samples,
        };
        self.probe.lock().seeks.push(actual);
        Ok(actual)
    }

    fn channels(&self) -> u8 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn format(&self) -> SampleFormat {
        self.format
    }

    fn length_samples(&self) -> Option<u64> {
        self.length
    }

    fn path(&self) -> &str {
        &self.path
    }
}

/// A sink with a bounded fake ring that "plays" instantly: once the source
/// is out and the queue is empty it reports AT_END.
pub struct FakeSink {
    probe: Probe,
}

impl FakeSink {
    pub fn new(probe: &Probe, room: usize) -> Self {
        let mut st = probe.lock();
        st.room = room;
        st.state = SinkState::Stopped;
        drop(st);
        Self {
            probe: probe.clone(),
        }
    }
}

impl Sink for FakeSink {
    fn start(&mut self) -> Result<()> {
        let mut st = self.probe.lock();
        if st.state == SinkState::Stopped {
            st.state = SinkState::Playing;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut st = self.probe.lock();
        if st.state == SinkState::Playing {
            st.state = SinkState::Stopped;
        }
        st.stop_seen = true;
        Ok(())
    }

    fn state(&self) -> SinkState {
        let mut st = self.probe.lock();
        if st.source_out && st.queued.is_empty() && st.state != SinkState::Failed {
            st.state = SinkState::AtEnd;
        }
        st.state
    }

    fn position(&self) -> u64 {
        self.probe.lock().frames_consumed
    }

    fn set_position(&mut self, samples: u64) {
        let mut st = self.probe.lock();
        st.stopped_before_set_position = st.state != SinkState::Playing && st.stop_seen;
        let n = st.queued.len();
        st.queued.clear();
        st.room += n;
        st.flushed = true;
        st.frames_consumed = samples;
        st.source_out = false;
        if st.state != SinkState::Failed {
            st.state = SinkState::Stopped;
        }
    }

    fn source_out(&mut self) {
        self.probe.lock().source_out = true;
    }

    fn transfer(&mut self, bytes: &[u8]) -> usize {
        let mut st = self.probe.lock();
        let n = bytes.len().min(st.room);
        st.queued.extend(bytes[..n].iter().copied());
        st.room -= n;
        n
    }
}
