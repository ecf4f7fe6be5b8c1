//! The player: at most one loaded pipeline and the command surface over it.
//!
//! Commands arrive from the reactor already tokenised and validated for
//! arity; each handler returns the final `ACK` for the requesting tag and
//! broadcasts any state changes through the response channel as it goes.
//! The reactor's periodic tick lands in [`Player::update`], which pumps the
//! pipeline, watches for the end of the file, and throttles unsolicited
//! `POS` broadcasts to one per playback second.

use std::collections::BTreeMap;

use crossbeam_channel::Sender;

use crate::error::{DeckError, DeckResult};
use crate::pipeline::Pipeline;
use crate::response::{ClientId, Code, Outgoing, Response, BROADCAST, NOREQUEST};
use crate::sink::{SinkBuilder, SinkState};
use crate::source::SourceBuilder;

/// Protocol version announced in the greeting.
const PROTOCOL_VERSION: &str = "bifrost-0.3";

/// Role token announced in the greeting.
const ROLE: &str = "player/file";

/// Observable player states; `Ejected` is the absent pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayerState {
    Ejected,
    Stopped,
    Playing,
    AtEnd,
}

pub struct Player {
    device_id: usize,
    sink_builder: SinkBuilder,
    sources: BTreeMap<String, SourceBuilder>,
    pipeline: Option<Pipeline>,
    dead: bool,
    io: Option<Sender<Outgoing>>,
    /// Sink state seen by the previous update; distinguishes a fresh END
    /// from a file already sitting at its end.
    last_state: SinkState,
    /// Whole-second part of the last broadcast position.
    last_pos_second: Option<u64>,
}

impl Player {
    pub fn new(
        device_id: usize,
        sink_builder: SinkBuilder,
        sources: BTreeMap<String, SourceBuilder>,
    ) -> Self {
        Self {
            device_id,
            sink_builder,
            sources,
            pipeline: None,
            dead: false,
            io: None,
            last_state: SinkState::Stopped,
            last_pos_second: None,
        }
    }

    /// Inject the outbound response channel. Called once, after the reactor
    /// owning the receiving end exists.
    pub fn set_io(&mut self, io: Sender<Outgoing>) {
        self.io = Some(io);
    }

    pub fn state(&self) -> PlayerState {
        match self.pipeline.as_ref().map(Pipeline::state) {
            None => PlayerState::Ejected,
            Some(SinkState::Playing) => PlayerState::Playing,
            Some(SinkState::AtEnd) => PlayerState::AtEnd,
            Some(SinkState::Stopped) | Some(SinkState::Failed) => PlayerState::Stopped,
        }
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    //
    // Commands
    //

    pub fn play(&mut self, tag: &str) -> Response {
        let state = self.state();
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Response::failure(tag, "play", &DeckError::NoAudio.to_string());
        };
        match state {
            PlayerState::AtEnd => Response::failure(tag, "play", "already at end of file"),
            PlayerState::Playing => Response::success(tag, "play"),
            _ => match pipeline.set_playing(true) {
                Ok(()) => {
                    self.last_state = SinkState::Playing;
                    self.broadcast(Response::new(NOREQUEST, Code::Play));
                    Response::success(tag, "play")
                }
                Err(e) => Response::failure(tag, "play", &format!("{e:#}")),
            },
        }
    }

    pub fn stop(&mut self, tag: &str) -> Response {
        let state = self.state();
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Response::failure(tag, "stop", &DeckError::NoAudio.to_string());
        };
        match state {
            PlayerState::AtEnd => Response::failure(tag, "stop", "already at end of file"),
            PlayerState::Stopped => Response::success(tag, "stop"),
            _ => match pipeline.set_playing(false) {
                Ok(()) => {
                    self.last_state = SinkState::Stopped;
                    self.broadcast(Response::new(NOREQUEST, Code::Stop));
                    Response::success(tag, "stop")
                }
                Err(e) => Response::failure(tag, "stop", &format!("{e:#}")),
            },
        }
    }

    pub fn eject(&mut self, tag: &str) -> Response {
        if self.pipeline.is_some() {
            self.eject_pipeline();
        }
        Response::success(tag, "eject")
    }

    pub fn load(&mut self, tag: &str, path: &str) -> Response {
        if self.pipeline.is_some() {
            self.eject_pipeline();
        }
        match self.build_pipeline(path) {
            Ok(length) => {
                self.broadcast(Response::new(NOREQUEST, Code::Fload).arg(path));
                if let Some(len) = length {
                    self.broadcast(Response::new(NOREQUEST, Code::Len).arg(len.to_string()));
                }
                tracing::info!(path, "loaded");
                Response::success(tag, "load")
            }
            Err(e) => Response::failure(tag, "load", &e.to_string()),
        }
    }

    pub fn pos(&mut self, tag: &str, pos_str: &str) -> Response {
        let Ok(micros) = pos_str.parse::<u64>() else {
            return Response::invalid(tag, "pos", "not an integer");
        };
        let was_playing = self.state() == PlayerState::Playing;
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Response::failure(tag, "pos", &DeckError::NoAudio.to_string());
        };
        match pipeline.seek_micros(micros) {
            Ok(actual) => {
                self.last_state = SinkState::Stopped;
                if was_playing {
                    self.broadcast(Response::new(NOREQUEST, Code::Stop));
                }
                self.broadcast_pos(actual);
                Response::success(tag, "pos")
            }
            Err(e) => Response::failure(
                tag,
                "pos",
                &DeckError::SeekRange(format!("{e:#}")).to_string(),
            ),
        }
    }

    /// User-facing `end`: stop and rewind to the start of the file.
    pub fn end(&mut self, tag: &str) -> Response {
        let was_playing = self.state() == PlayerState::Playing;
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Response::failure(tag, "end", &DeckError::NoAudio.to_string());
        };
        match pipeline.seek_micros(0) {
            Ok(actual) => {
                self.last_state = SinkState::Stopped;
                if was_playing {
                    self.broadcast(Response::new(NOREQUEST, Code::Stop));
                }
                self.broadcast_pos(actual);
                Response::success(tag, "end")
            }
            Err(e) => Response::failure(
                tag,
                "end",
                &DeckError::SeekRange(format!("{e:#}")).to_string(),
            ),
        }
    }

    /// Dump the player state to one client, under that request's tag.
    pub fn dump(&self, id: ClientId, tag: &str) -> Response {
        self.dump_to(id, tag);
        Response::success(tag, "dump")
    }

    pub fn quit(&mut self, tag: &str) -> Response {
        if self.dead {
            return Response::failure(tag, "quit", "already quitting");
        }
        self.dead = true;
        tracing::info!("quit requested");
        Response::success(tag, "quit")
    }

    /// Greeting sequence for a freshly accepted connection.
    pub fn welcome(&self, id: ClientId) {
        self.respond(
            id,
            Response::new(NOREQUEST, Code::Ohai)
                .arg(PROTOCOL_VERSION)
                .arg("deckd")
                .arg(env!("CARGO_PKG_VERSION")),
        );
        self.respond(id, Response::new(NOREQUEST, Code::Iama).arg(ROLE));
        self.dump_to(id, NOREQUEST);
    }

    //
    // Update tick
    //

    /// One reactor tick: pump the pipeline, detect the end of the file, and
    /// maybe broadcast the position. Returns false once the player has been
    /// asked to quit.
    pub fn update(&mut self) -> bool {
        if self.dead {
            return false;
        }

        let prev = self.last_state;
        let step = match self.pipeline.as_mut() {
            None => return true,
            Some(p) => match p.update() {
                Ok(state) => Ok((state, p.position_micros())),
                Err(e) => Err(e),
            },
        };

        match step {
            Err(e) => {
                tracing::warn!("pipeline failure: {e:#}");
                if prev == SinkState::Playing {
                    self.broadcast(Response::new(NOREQUEST, Code::Stop));
                }
                self.eject_pipeline();
            }
            Ok((SinkState::Failed, _)) => {
                tracing::warn!("output sink failed");
                if prev == SinkState::Playing {
                    self.broadcast(Response::new(NOREQUEST, Code::Stop));
                }
                self.eject_pipeline();
            }
            Ok((state, pos)) => {
                self.last_state = state;
                if state == SinkState::AtEnd && prev == SinkState::Playing {
                    self.broadcast(Response::new(NOREQUEST, Code::End));
                    self.broadcast(Response::new(NOREQUEST, Code::Stop));
                } else if state == SinkState::Playing && self.can_broadcast_pos(pos) {
                    self.broadcast_pos(pos);
                }
            }
        }

        true
    }

    //
    // Internals
    //

    fn build_pipeline(&mut self, path: &str) -> DeckResult<Option<u64>> {
        let ext = extension_of(path);
        let builder = self
            .sources
            .get(&ext)
            .ok_or_else(|| DeckError::NoDecoder(ext.clone()))?;
        let source = builder(path).map_err(|e| DeckError::DecoderBuild(format!("{e:#}")))?;
        let sink = (self.sink_builder)(source.as_ref(), self.device_id)
            .map_err(|e| DeckError::BadFormat(format!("{e:#}")))?;

        let length = source.length_micros();
        self.pipeline = Some(Pipeline::new(source, sink));
        self.last_state = SinkState::Stopped;
        self.last_pos_second = None;
        Ok(length)
    }

    fn eject_pipeline(&mut self) {
        self.pipeline = None;
        self.last_state = SinkState::Stopped;
        self.last_pos_second = None;
        self.broadcast(Response::new(NOREQUEST, Code::Eject));
        tracing::info!("ejected");
    }

    fn dump_to(&self, id: ClientId, tag: &str) {
        match self.pipeline.as_ref() {
            None => self.respond(id, Response::new(tag, Code::Eject)),
            Some(p) => {
                self.respond(id, Response::new(tag, Code::Fload).arg(p.path()));
                if let Some(len) = p.length_micros() {
                    self.respond(id, Response::new(tag, Code::Len).arg(len.to_string()));
                }
                let state = match p.state() {
                    SinkState::Playing => Code::Play,
                    SinkState::AtEnd => Code::End,
                    SinkState::Stopped | SinkState::Failed => Code::Stop,
                };
                self.respond(id, Response::new(tag, state));
                self.respond(
                    id,
                    Response::new(tag, Code::Pos).arg(p.position_micros().to_string()),
                );
            }
        }
    }

    /// Throttle: a broadcast POS goes out at most once per playback second,
    /// and always right after a load or seek.
    fn can_broadcast_pos(&self, micros: u64) -> bool {
        match self.last_pos_second {
            None => true,
            Some(last) => micros / 1_000_000 > last,
        }
    }

    fn broadcast_pos(&mut self, micros: u64) {
        self.last_pos_second = Some(micros / 1_000_000);
        self.broadcast(Response::new(NOREQUEST, Code::Pos).arg(micros.to_string()));
    }

    fn broadcast(&self, response: Response) {
        self.respond(BROADCAST, response);
    }

    fn respond(&self, id: ClientId, response: Response) {
        if let Some(io) = &self.io {
            let _ = io.send(Outgoing { id, response });
        }
    }
}

/// The lowercased extension after the last dot, or empty.
fn extension_of(path: &str) -> String {
    path.rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default()
}
