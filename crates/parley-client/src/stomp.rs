//! STOMP 1.2 frames, as carried in WebSocket text messages.
//!
//! A frame is a command line, `name:value` header lines, a blank line, the
//! body and a NUL byte. A text message holding only end-of-line characters
//! is a heart-beat.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StompError {
    #[error("frame has no command")]
    MissingCommand,

    #[error("unknown command {0:?}")]
    UnknownCommand(String),

    #[error("malformed header line {0:?}")]
    MalformedHeader(String),

    #[error("invalid escape in header {0:?}")]
    BadEscape(String),

    #[error("frame is not NUL terminated")]
    MissingNul,

    #[error("invalid content-length {0:?}")]
    BadContentLength(String),

    #[error("body is not valid UTF-8")]
    BodyEncoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Connected,
    Subscribe,
    Unsubscribe,
    Send,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// CONNECT and CONNECTED headers are sent verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => return Err(StompError::UnknownCommand(other.to_string())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of `name`; repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    // -- Client frames --

    pub fn connect(host: &str, token: &str, heartbeat_ms: u64) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", format!("{},{}", heartbeat_ms, heartbeat_ms))
            .header("Authorization", format!("Bearer {}", token))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send_json(destination: &str, json: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(json)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    // -- Codec --

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame. `Ok(None)` means the text was a heart-beat.
    pub fn decode(text: &str) -> Result<Option<Frame>, StompError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let (head, rest) = match text.find("\n\n") {
            Some(i) => (&text[..i], &text[i + 2..]),
            None => match text.find("\r\n\r\n") {
                Some(i) => (&text[..i], &text[i + 4..]),
                None => return Err(StompError::MissingNul),
            },
        };

        let mut lines = head.lines();
        let command: Command = lines
            .next()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.is_empty())
            .ok_or(StompError::MissingCommand)?
            .parse()?;

        let unescape = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            let line = line.trim_end_matches('\r');
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::MalformedHeader(line.to_string()))?;
            if unescape {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| v.parse::<usize>().map_err(|_| StompError::BadContentLength(v.clone())))
            .transpose()?;

        let bytes = rest.as_bytes();
        let body = match length {
            Some(n) => {
                if bytes.len() <= n || bytes[n] != 0 {
                    return Err(StompError::MissingNul);
                }
                &bytes[..n]
            }
            None => {
                let end = bytes.iter().position(|b| *b == 0).ok_or(StompError::MissingNul)?;
                &bytes[..end]
            }
        };
        let body = std::str::from_utf8(body)
            .map_err(|_| StompError::BodyEncoding)?
            .to_string();

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(StompError::BadEscape(s.to_string())),
        }
    }
    Ok(out)
}
