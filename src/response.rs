//! Protocol responses and their wire encoding.
//!
//! A response is a tag, a code, and zero or more arguments. The tag echoes
//! the request that produced the response; unsolicited messages carry the
//! sentinel tag `!`. Arguments are escaped on the way out with the same
//! quoting rules the tokeniser applies on the way in, so packed lines
//! round-trip.

/// Identifies one connection in the pool. `0` is reserved for broadcasts.
pub type ClientId = usize;

/// The pseudo-client id addressed by broadcast responses.
pub const BROADCAST: ClientId = 0;

/// The tag used for responses not caused by any request.
pub const NOREQUEST: &str = "!";

/// The fixed set of response codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    /// Greeting: protocol version and server identity.
    Ohai,
    /// Greeting: server role.
    Iama,
    /// The loaded file just changed.
    Fload,
    /// The loaded file was ejected.
    Eject,
    /// Current playback position, in microseconds.
    Pos,
    /// The loaded file reached its end.
    End,
    /// Playback started.
    Play,
    /// Playback stopped.
    Stop,
    /// Final result of a command.
    Ack,
    /// Length of the loaded file, in microseconds.
    Len,
}

impl Code {
    pub fn as_str(self) -> &'static str {
        match self {
            Code::Ohai => "OHAI",
            Code::Iama => "IAMA",
            Code::Fload => "FLOAD",
            Code::Eject => "EJECT",
            Code::Pos => "POS",
            Code::End => "END",
            Code::Play => "PLAY",
            Code::Stop => "STOP",
            Code::Ack => "ACK",
            Code::Len => "LEN",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    tag: String,
    code: Code,
    args: Vec<String>,
}

impl Response {
    pub fn new(tag: &str, code: Code) -> Self {
        Self {
            tag: tag.to_string(),
            code,
            args: Vec::new(),
        }
    }

    /// Append an unescaped argument, for chaining.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `TAG ACK OK <cmd>` for a successful command.
    pub fn success(tag: &str, cmd: &str) -> Self {
        Self::new(tag, Code::Ack).arg("OK").arg(cmd)
    }

    /// `TAG ACK FAIL <cmd> <msg>` for a well-formed but rejected command.
    pub fn failure(tag: &str, cmd: &str, msg: &str) -> Self {
        Self::new(tag, Code::Ack).arg("FAIL").arg(cmd).arg(msg)
    }

    /// `TAG ACK WHAT <cmd> <msg>` for malformed input.
    pub fn invalid(tag: &str, cmd: &str, msg: &str) -> Self {
        Self::new(tag, Code::Ack).arg("WHAT").arg(cmd).arg(msg)
    }

    /// Encode as one protocol line, without the trailing newline.
    pub fn pack(&self) -> String {
        let mut line = String::new();
        line.push_str(&escape(&self.tag));
        line.push(' ');
        line.push_str(self.code.as_str());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&escape(arg));
        }
        line
    }
}

/// A response together with the connection it is addressed to.
#[derive(Clone, Debug)]
pub struct Outgoing {
    pub id: ClientId,
    pub response: Response,
}

/// Single-quote an argument when it contains anything the tokeniser treats
/// specially. Embedded quotes use the shell `'\''` dance, which the
/// tokeniser reverses exactly.
fn escape(arg: &str) -> String {
    let plain = !arg.is_empty()
        && !arg
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '\\');
    if plain {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokeniser::{LineResult, Tokeniser};

    #[test]
    fn packs_plain_arguments_verbatim() {
        let resp = Response::new("!", Code::Pos).arg("50000");
        assert_eq!(resp.pack(), "! POS 50000");
    }

    #[test]
    fn packs_ack_shortcuts() {
        assert_eq!(Response::success("c1", "play").pack(), "c1 ACK OK play");
        assert_eq!(
            Response::failure("c1", "play", "no file loaded").pack(),
            "c1 ACK FAIL play 'no file loaded'"
        );
        assert_eq!(
            Response::invalid("c7", "pos", "not an integer").pack(),
            "c7 ACK WHAT pos 'not an integer'"
        );
    }

    #[test]
    fn escapes_whitespace_and_quotes() {
        let resp = Response::new("!", Code::Fload).arg("/music/two words.flac");
        assert_eq!(resp.pack(), "! FLOAD '/music/two words.flac'");

        let resp = Response::new("!", Code::Fload).arg("it's.mp3");
        assert_eq!(resp.pack(), r"! FLOAD 'it'\''s.mp3'");
    }

    #[test]
    fn escapes_empty_argument() {
        let resp = Response::new("t", Code::Ack).arg("");
        assert_eq!(resp.pack(), "t ACK ''");
    }

    #[test]
    fn packed_lines_round_trip_through_the_tokeniser() {
        let awkward = [
            "plain",
            "two words",
            "it's got 'quotes'",
            r"back\slash",
            "\"double\"",
            "",
            "mixed 'single' and \"double\" and \\ space",
        ];

        for arg in awkward {
            let packed = Response::new("tag", Code::Fload).arg(arg).pack();
            let mut tok = Tokeniser::new();
            let mut lines = tok.feed(format!("{packed}\n").as_bytes());
            assert_eq!(lines.len(), 1);
            match lines.pop().unwrap() {
                LineResult::Words(words) => {
                    assert_eq!(words, vec!["tag".to_string(), "FLOAD".into(), arg.into()]);
                }
                LineResult::Overlong => panic!("round-trip overflowed"),
            }
        }
    }
}
