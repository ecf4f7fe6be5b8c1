//! The audio pipeline: one source, one sink, and the frame in flight.
//!
//! Each reactor tick calls [`Pipeline::update`], which performs at most one
//! decode step and moves as much of the current frame into the sink's ring
//! as fits. Short transfers are normal when the ring is full; the cursor
//! simply carries the remainder to the next tick.

use anyhow::Result;

use crate::sink::{Sink, SinkState};
use crate::source::{DecodeState, Source};

pub struct Pipeline {
    source: Box<dyn Source>,
    sink: Box<dyn Sink>,
    /// The most recent decode result not yet fully handed to the sink.
    frame: Vec<u8>,
    /// Offset of the first byte of `frame` the sink has not accepted.
    cursor: usize,
    /// The source reported EOF; `decode` is not called again.
    source_drained: bool,
}

impl Pipeline {
    pub fn new(source: Box<dyn Source>, sink: Box<dyn Sink>) -> Self {
        Self {
            source,
            sink,
            frame: Vec::new(),
            cursor: 0,
            source_drained: false,
        }
    }

    /// One non-blocking pump step; returns the sink state afterwards.
    pub fn update(&mut self) -> Result<SinkState> {
        if self.frame_finished() && !self.source_drained {
            let decoded = self.source.decode()?;
            self.frame = decoded.bytes;
            self.cursor = 0;
            if decoded.state == DecodeState::Eof {
                self.source_drained = true;
            }
        }

        if self.source_drained && self.frame_finished() {
            self.sink.source_out();
        }

        if !self.frame_finished() {
            let accepted = self.sink.transfer(&self.frame[self.cursor..]);
            self.cursor += accepted;
            if self.frame_finished() {
                self.clear_frame();
            }
        }

        Ok(self.sink.state())
    }

    pub fn set_playing(&mut self, playing: bool) -> Result<()> {
        if playing {
            self.sink.start()
        } else {
            self.sink.stop()
        }
    }

    /// Seek to a position in microseconds, returning the microsecond
    /// position actually reached (the source clamps past-end requests).
    ///
    /// The sink is stopped across the seek so the ring flush inside
    /// `set_position` never races the callback; resuming is the caller's
    /// decision.
    pub fn seek_micros(&mut self, micros: u64) -> Result<u64> {
        let target = self.source.samples_from_micros(micros);
        self.sink.stop()?;
        let actual = self.source.seek(target)?;
        self.sink.set_position(actual);
        self.source_drained = false;
        self.clear_frame();
        Ok(self.source.micros_from_samples(actual))
    }

    pub fn position_micros(&self) -> u64 {
        self.source.micros_from_samples(self.sink.position())
    }

    pub fn length_micros(&self) -> Option<u64> {
        self.source.length_micros()
    }

    pub fn path(&self) -> &str {
        self.source.path()
    }

    pub fn state(&self) -> SinkState {
        self.sink.state()
    }

    fn frame_finished(&self) -> bool {
        self.cursor >= self.frame.len()
    }

    fn clear_frame(&mut self) {
        self.frame.clear();
        self.cursor = 0;
    }
}
