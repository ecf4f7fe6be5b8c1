//! The I/O reactor: the control socket, the connection pool, and the
//! periodic player update.
//!
//! Everything that touches the player happens on the reactor thread, which
//! multiplexes one event channel (new sockets, tokenised command lines,
//! disconnects, Ctrl-C) with a `tick` timer. Commands therefore execute
//! serially in arrival order, and every tick calls [`Player::update`]
//! exactly once. Per-connection blocking I/O lives on the reader and writer
//! threads in [`connection`]; a slow or dead client only ever costs itself.

mod connection;
mod pool;

use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{select, tick, unbounded, Receiver, Sender};

use crate::player::Player;
use crate::response::{ClientId, Outgoing, Response, BROADCAST, NOREQUEST};

use connection::Connection;
use pool::Pool;

/// Default bind host for the control socket.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default TCP port for the control socket.
pub const DEFAULT_PORT: u16 = 1350;

/// Cadence of the player update tick.
const PLAYER_UPDATE_PERIOD: Duration = Duration::from_millis(10);

/// Everything that can wake the reactor.
#[derive(Debug)]
pub enum Event {
    /// The accept thread produced a new client socket.
    Accepted(TcpStream),
    /// A connection read one complete command line.
    Line { id: ClientId, words: Vec<String> },
    /// A connection read a line exceeding the length bound.
    Overlong { id: ClientId },
    /// A connection hit EOF or a read error.
    Closed { id: ClientId },
    /// Ctrl-C.
    Shutdown,
}

pub struct Reactor {
    player: Player,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
    outgoing: Receiver<Outgoing>,
    pool: Pool<Connection>,
}

impl Reactor {
    /// Build the reactor around a player, wiring the player's outbound
    /// response channel back to this reactor.
    pub fn new(mut player: Player) -> Self {
        let (events_tx, events_rx) = unbounded();
        let (outgoing_tx, outgoing) = unbounded();
        player.set_io(outgoing_tx);
        Self {
            player,
            events_tx,
            events_rx,
            outgoing,
            pool: Pool::new(),
        }
    }

    /// Bind the control socket and run until quit or Ctrl-C.
    pub fn run(&mut self, host: &str, port: u16) -> Result<()> {
        let listener =
            TcpListener::bind((host, port)).with_context(|| format!("bind {host}:{port}"))?;
        tracing::info!(host, port, "listening");

        let accept_listener = listener.try_clone().context("clone listener")?;
        let accept_tx = self.events_tx.clone();
        std::thread::spawn(move || accept_main(accept_listener, accept_tx));

        let interrupt_tx = self.events_tx.clone();
        let _ = ctrlc::set_handler(move || {
            let _ = interrupt_tx.send(Event::Shutdown);
        });

        self.run_loop();
        Ok(())
    }

    fn run_loop(&mut self) {
        let events = self.events_rx.clone();
        let ticker = tick(PLAYER_UPDATE_PERIOD);

        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(Event::Accepted(stream)) => self.accept(stream),
                    Ok(Event::Line { id, words }) => self.run_command(id, words),
                    Ok(Event::Overlong { id }) => {
                        self.unicast(id, &Response::invalid(NOREQUEST, "line", "line too long"));
                    }
                    Ok(Event::Closed { id }) => self.remove(id),
                    Ok(Event::Shutdown) => {
                        tracing::info!("interrupt received");
                        break;
                    }
                    Err(_) => break,
                },
                recv(ticker) -> _ => {
                    if !self.player.update() {
                        break;
                    }
                    self.dispatch_outgoing();
                }
            }
        }

        self.shutdown();
    }

    fn accept(&mut self, stream: TcpStream) {
        let id = self.pool.next_id();
        match Connection::spawn(id, stream, self.events_tx.clone()) {
            Ok(conn) => {
                tracing::info!(client = id, peer = conn.peer(), "client connected");
                self.pool.insert(conn);
                self.player.welcome(id);
                self.dispatch_outgoing();
            }
            Err(e) => tracing::warn!("failed to adopt connection: {e:#}"),
        }
    }

    /// Execute one tokenised command line: state broadcasts flow out while
    /// the command runs, then the final ACK goes back to the requester.
    fn run_command(&mut self, id: ClientId, words: Vec<String>) {
        if words.is_empty() {
            return;
        }
        let tag = words[0].clone();
        let ack = self.execute(id, &tag, &words);
        self.dispatch_outgoing();
        self.unicast(id, &ack);
    }

    fn execute(&mut self, id: ClientId, tag: &str, words: &[String]) -> Response {
        let Some(cmd) = words.get(1).map(String::as_str) else {
            return Response::invalid(tag, "?", "missing command");
        };
        let args = &words[2..];
        match (cmd, args) {
            ("play", []) => self.player.play(tag),
            ("stop", []) => self.player.stop(tag),
            ("eject", []) => self.player.eject(tag),
            ("end", []) => self.player.end(tag),
            ("dump", []) => self.player.dump(id, tag),
            ("quit", []) => self.player.quit(tag),
            ("load", [path]) => self.player.load(tag, path),
            ("pos", [pos]) => self.player.pos(tag, pos),
            ("play" | "stop" | "eject" | "end" | "dump" | "quit" | "load" | "pos", _) => {
                Response::invalid(tag, cmd, "wrong number of arguments")
            }
            _ => Response::invalid(tag, cmd, "unknown command"),
        }
    }

    /// Route everything the player queued since the last drain.
    fn dispatch_outgoing(&mut self) {
        let pending: Vec<Outgoing> = self.outgoing.try_iter().collect();
        for out in pending {
            if out.id == BROADCAST {
                self.broadcast(&out.response);
            } else {
                self.unicast(out.id, &out.response);
            }
        }
    }

    fn broadcast(&mut self, response: &Response) {
        let line = format!("{}\n", response.pack());
        let mut dead = Vec::new();
        for (id, conn) in self.pool.iter() {
            if !conn.send(line.clone()) {
                dead.push(id);
            }
        }
        for id in dead {
            self.remove(id);
        }
    }

    fn unicast(&mut self, id: ClientId, response: &Response) {
        let line = format!("{}\n", response.pack());
        let failed = match self.pool.get(id) {
            Some(conn) => !conn.send(line),
            None => false,
        };
        if failed {
            self.remove(id);
        }
    }

    fn remove(&mut self, id: ClientId) {
        if let Some(conn) = self.pool.remove(id) {
            tracing::info!(client = id, peer = conn.peer(), "client disconnected");
        }
    }

    /// Drain queued responses, then close every connection; each close
    /// flushes that connection's pending writes first.
    fn shutdown(&mut self) {
        tracing::info!("shutting down");
        self.dispatch_outgoing();
        self.pool.drain();
    }
}

fn accept_main(listener: TcpListener, events: Sender<Event>) {
    loop {
        match listener.accept() {
            Ok((stream, _)) => {
                if events.send(Event::Accepted(stream)).is_err() {
                    return;
                }
            }
            Err(e) => tracing::warn!("accept error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Sink, SinkBuilder};
    use crate::source::{SampleFormat, Source, SourceBuilder};
    use crate::testutil::{FakeSink, Probe, ScriptSource};
    use std::collections::BTreeMap;
    use std::io::{BufRead, BufReader};
    use std::time::Duration;

    fn test_reactor() -> Reactor {
        let probe = Probe::default();

        let src_probe = probe.clone();
        let mut sources: BTreeMap<String, SourceBuilder> = BTreeMap::new();
        sources.insert(
            "wav".to_string(),
            Box::new(move |path: &str| {
                let source =
                    ScriptSource::new(&src_probe, 8_000, 1, SampleFormat::S16, Some(800), vec![])
                        .at_path(path);
                Ok(Box::new(source) as Box<dyn Source>)
            }),
        );

        let sink_probe = probe.clone();
        let sink_builder: SinkBuilder = Box::new(move |_src, _dev| {
            Ok(Box::new(FakeSink::new(&sink_probe, 64)) as Box<dyn Sink>)
        });

        Reactor::new(Player::new(0, sink_builder, sources))
    }

    /// Adopt a loopback socket into the reactor, returning the client half
    /// wrapped for line reads.
    fn join(reactor: &mut Reactor) -> BufReader<TcpStream> {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let (server, _) = listener.accept().unwrap();
        reactor.accept(server);
        BufReader::new(client)
    }

    fn read_line(reader: &mut BufReader<TcpStream>) -> String {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line.trim_end().to_string()
    }

    #[test]
    fn new_clients_are_greeted_and_dumped() {
        let mut reactor = test_reactor();
        let mut client = join(&mut reactor);

        assert!(read_line(&mut client).starts_with("! OHAI bifrost-0.3 deckd "));
        assert_eq!(read_line(&mut client), "! IAMA player/file");
        assert_eq!(read_line(&mut client), "! EJECT");
    }

    #[test]
    fn commands_are_acked_on_the_issuing_connection() {
        let mut reactor = test_reactor();
        let mut client = join(&mut reactor);
        for _ in 0..3 {
            read_line(&mut client);
        }

        reactor.run_command(1, vec!["c1".into(), "play".into()]);
        assert_eq!(read_line(&mut client), "c1 ACK FAIL play 'no file loaded'");
    }

    #[test]
    fn malformed_commands_get_ack_what() {
        let mut reactor = test_reactor();
        let mut client = join(&mut reactor);
        for _ in 0..3 {
            read_line(&mut client);
        }

        reactor.run_command(1, vec!["t1".into(), "frobnicate".into()]);
        assert_eq!(
            read_line(&mut client),
            "t1 ACK WHAT frobnicate 'unknown command'"
        );

        reactor.run_command(1, vec!["t2".into(), "load".into()]);
        assert_eq!(
            read_line(&mut client),
            "t2 ACK WHAT load 'wrong number of arguments'"
        );

        reactor.run_command(1, vec!["t3".into()]);
        assert_eq!(read_line(&mut client), "t3 ACK WHAT ? 'missing command'");
    }

    #[test]
    fn broadcasts_reach_every_client_but_acks_do_not() {
        let mut reactor = test_reactor();
        let mut alice = join(&mut reactor);
        let mut bob = join(&mut reactor);
        for _ in 0..3 {
            read_line(&mut alice);
            read_line(&mut bob);
        }

        // Bob loads and plays; both clients see the broadcasts.
        reactor.run_command(2, vec!["c8".into(), "load".into(), "/tmp/t.wav".into()]);
        reactor.run_command(2, vec!["c9".into(), "play".into()]);

        assert_eq!(read_line(&mut alice), "! FLOAD /tmp/t.wav");
        assert_eq!(read_line(&mut alice), "! LEN 100000");
        assert_eq!(read_line(&mut alice), "! PLAY");

        assert_eq!(read_line(&mut bob), "! FLOAD /tmp/t.wav");
        assert_eq!(read_line(&mut bob), "! LEN 100000");
        assert_eq!(read_line(&mut bob), "c8 ACK OK load");
        assert_eq!(read_line(&mut bob), "! PLAY");
        assert_eq!(read_line(&mut bob), "c9 ACK OK play");
    }

    #[test]
    fn dump_is_unicast_to_the_requester() {
        let mut reactor = test_reactor();
        let mut alice = join(&mut reactor);
        let mut bob = join(&mut reactor);
        for _ in 0..3 {
            read_line(&mut alice);
            read_line(&mut bob);
        }

        reactor.run_command(2, vec!["c7".into(), "load".into(), "/tmp/t.wav".into()]);
        read_line(&mut alice); // FLOAD
        read_line(&mut alice); // LEN
        for _ in 0..3 {
            read_line(&mut bob); // FLOAD, LEN, ACK
        }

        // Alice dumps; Bob then plays so his stream has a next line to
        // prove the dump never reached him.
        reactor.run_command(1, vec!["c8".into(), "dump".into()]);
        reactor.run_command(2, vec!["c9".into(), "play".into()]);

        assert_eq!(read_line(&mut alice), "c8 FLOAD /tmp/t.wav");
        assert_eq!(read_line(&mut alice), "c8 LEN 100000");
        assert_eq!(read_line(&mut alice), "c8 STOP");
        assert_eq!(read_line(&mut alice), "c8 POS 0");
        assert_eq!(read_line(&mut alice), "c8 ACK OK dump");
        assert_eq!(read_line(&mut alice), "! PLAY");

        assert_eq!(read_line(&mut bob), "! PLAY");
        assert_eq!(read_line(&mut bob), "c9 ACK OK play");
    }

    #[test]
    fn disconnects_free_the_client_slot() {
        let mut reactor = test_reactor();
        let client = {
            let reader = join(&mut reactor);
            reader.into_inner()
        };
        drop(client);

        // The reader thread notices and posts the disconnect.
        let event = reactor
            .events_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        match event {
            Event::Closed { id } => {
                reactor.remove(id);
                assert_eq!(reactor.pool.next_id(), id);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
