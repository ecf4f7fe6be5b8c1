//! Incremental tokeniser for the line-oriented command protocol.
//!
//! Commands are newline-terminated lists of words separated by whitespace,
//! with POSIX-shell-style quoting: single quotes take everything literally,
//! double quotes allow backslash escapes, and a bare backslash escapes the
//! next byte (including a newline). Input arrives in arbitrary chunks from
//! the socket, so partial lines are carried across calls to [`Tokeniser::feed`].
//!
//! The tokeniser is byte-oriented; completed words are converted to strings
//! lossily, so malformed UTF-8 cannot take a connection down.

/// Upper bound on one command line; longer lines are rejected.
pub const MAX_LINE_BYTES: usize = 8192;

/// One completed line from the feed.
#[derive(Clone, Debug, PartialEq)]
pub enum LineResult {
    /// A tokenised command line (possibly zero words).
    Words(Vec<String>),
    /// The line exceeded [`MAX_LINE_BYTES`] and was discarded.
    Overlong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Quote {
    None,
    Single,
    Double,
}

#[derive(Debug)]
pub struct Tokeniser {
    words: Vec<String>,
    current: Vec<u8>,
    in_word: bool,
    escape_next: bool,
    quote: Quote,
    line_bytes: usize,
    discarding: bool,
}

impl Tokeniser {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            current: Vec::new(),
            in_word: false,
            escape_next: false,
            quote: Quote::None,
            line_bytes: 0,
            discarding: false,
        }
    }

    /// Consume a chunk of raw input, returning every line it completed.
    pub fn feed(&mut self, data: &[u8]) -> Vec<LineResult> {
        let mut lines = Vec::new();

        for &byte in data {
            if self.discarding {
                if byte == b'\n' {
                    self.reset();
                    lines.push(LineResult::Overlong);
                }
                continue;
            }

            self.line_bytes += 1;
            if self.line_bytes > MAX_LINE_BYTES {
                self.discarding = true;
                continue;
            }

            if self.escape_next {
                self.push(byte);
                self.escape_next = false;
                continue;
            }

            match self.quote {
                Quote::Single => match byte {
                    b'\'' => self.quote = Quote::None,
                    _ => self.push(byte),
                },
                Quote::Double => match byte {
                    b'"' => self.quote = Quote::None,
                    b'\\' => self.escape_next = true,
                    _ => self.push(byte),
                },
                Quote::None => match byte {
                    b'\'' => {
                        self.quote = Quote::Single;
                        self.in_word = true;
                    }
                    b'"' => {
                        self.quote = Quote::Double;
                        self.in_word = true;
                    }
                    b'\\' => {
                        self.escape_next = true;
                        self.in_word = true;
                    }
                    b'\n' => lines.push(LineResult::Words(self.take_line())),
                    b if b.is_ascii_whitespace() => self.end_word(),
                    _ => self.push(byte),
                },
            }
        }

        lines
    }

    fn push(&mut self, byte: u8) {
        self.current.push(byte);
        self.in_word = true;
    }

    fn end_word(&mut self) {
        if self.in_word {
            let word = std::mem::take(&mut self.current);
            self.words.push(String::from_utf8_lossy(&word).into_owned());
            self.in_word = false;
        }
    }

    fn take_line(&mut self) -> Vec<String> {
        self.end_word();
        let line = std::mem::take(&mut self.words);
        self.reset();
        line
    }

    fn reset(&mut self) {
        self.current.clear();
        self.words.clear();
        self.in_word = false;
        self.escape_next = false;
        self.quote = Quote::None;
        self.line_bytes = 0;
        self.discarding = false;
    }
}

impl Default for Tokeniser {
    fn default() -> Self {
        Self::new()
    }
}
