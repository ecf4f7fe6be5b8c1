//! One client connection: a reader thread feeding the tokeniser and a
//! writer thread draining an outbound queue.
//!
//! The reader forwards complete command lines to the reactor as events and
//! reports the disconnect when the socket closes. The writer exists so a
//! slow client never stalls the reactor; dropping the connection closes the
//! outbound queue, lets the writer finish pending lines, then shuts the
//! socket down.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::response::ClientId;
use crate::tokeniser::{LineResult, Tokeniser};

use super::Event;

pub struct Connection {
    outbound: Option<Sender<String>>,
    stream: TcpStream,
    writer: Option<JoinHandle<()>>,
    peer: String,
}

impl Connection {
    /// Wrap an accepted socket, spawning its reader and writer threads.
    pub fn spawn(id: ClientId, stream: TcpStream, events: Sender<Event>) -> Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let reader_stream = stream.try_clone().context("clone stream for reader")?;
        let writer_stream = stream.try_clone().context("clone stream for writer")?;
        let (outbound, outbox) = unbounded::<String>();

        let writer = std::thread::spawn(move || writer_main(writer_stream, outbox));
        std::thread::spawn(move || reader_main(id, reader_stream, events));

        Ok(Self {
            outbound: Some(outbound),
            stream,
            writer: Some(writer),
            peer,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Queue one packed line for delivery. False once the writer is gone.
    pub fn send(&self, line: String) -> bool {
        match &self.outbound {
            Some(tx) => tx.send(line).is_ok(),
            None => false,
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Closing the queue first lets the writer drain pending responses
        // before the socket goes away.
        self.outbound.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn reader_main(id: ClientId, mut stream: TcpStream, events: Sender<Event>) {
    let mut tokeniser = Tokeniser::new();
    let mut buf = [0u8; 4096];

    loop {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                for line in tokeniser.feed(&buf[..n]) {
                    let event = match line {
                        LineResult::Words(words) => Event::Line { id, words },
                        LineResult::Overlong => Event::Overlong { id },
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(client = id, "read error: {e}");
                break;
            }
        }
    }

    let _ = events.send(Event::Closed { id });
}

fn writer_main(mut stream: TcpStream, outbox: Receiver<String>) {
    while let Ok(line) = outbox.recv() {
        if let Err(e) = stream.write_all(line.as_bytes()) {
            tracing::warn!("write error: {e}");
            break;
        }
    }
}
