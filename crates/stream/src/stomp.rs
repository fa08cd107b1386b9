//! Minimal STOMP 1.2 text codec for websocket transport.
//!
//! Each websocket message carries one or more frames. Bare EOLs between
//! frames are heart-beats and are skipped on decode.

use snafu::{OptionExt, ensure};

use crate::error::{
    ChannelResult, InvalidEscapeSnafu, MalformedHeaderSnafu, UnknownCommandSnafu,
    UnterminatedBodySnafu, UnterminatedHeadersSnafu,
};

const ACCEPT_VERSION: &str = "1.2,1.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    fn parse(raw: &str) -> ChannelResult<Self> {
        let command = match raw {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            other => {
                return UnknownCommandSnafu {
                    stage: "decode-command",
                    command: other.to_string(),
                }
                .fail();
            }
        };
        Ok(command)
    }

    // CONNECT and CONNECTED headers are sent verbatim.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
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

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; repeated headers keep the earliest entry.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, token: &str) -> Self {
        Self::new(Command::Connect)
            .with_header("accept-version", ACCEPT_VERSION)
            .with_header("host", host)
            .with_header("heart-beat", "0,0")
            .with_header("Authorization", format!("Bearer {token}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .with_header("id", id)
            .with_header("destination", destination)
            .with_header("ack", "auto")
    }

    pub fn send_json(destination: &str, body: impl Into<String>) -> Self {
        Self::send(destination, "application/json", body)
    }

    pub fn send_text(destination: &str, body: impl Into<String>) -> Self {
        Self::send(destination, "text/plain", body)
    }

    fn send(destination: &str, content_type: &str, body: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .with_header("destination", destination)
            .with_header("content-type", content_type)
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);
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
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Decodes every frame in one websocket message. Heart-beat only input
/// yields an empty list.
pub fn decode_frames(raw: &str) -> ChannelResult<Vec<Frame>> {
    let mut frames = Vec::new();
    let mut rest = raw;
    loop {
        rest = rest.trim_start_matches(['\r', '\n']);
        if rest.is_empty() {
            return Ok(frames);
        }
        let (frame, tail) = decode_one(rest)?;
        frames.push(frame);
        rest = tail;
    }
}

fn decode_one(input: &str) -> ChannelResult<(Frame, &str)> {
    let (command_line, mut rest) = split_line(input).context(UnterminatedHeadersSnafu {
        stage: "decode-command",
    })?;
    let command = Command::parse(command_line)?;

    let mut headers: Vec<(String, String)> = Vec::new();
    loop {
        let (line, tail) = split_line(rest).context(UnterminatedHeadersSnafu {
            stage: "decode-headers",
        })?;
        rest = tail;
        if line.is_empty() {
            break;
        }

        let (name, value) = line.split_once(':').context(MalformedHeaderSnafu {
            stage: "decode-headers",
            line: line.to_string(),
        })?;
        let (name, value) = if command.escapes_headers() {
            (unescape_header(name)?, unescape_header(value)?)
        } else {
            (name.to_string(), value.to_string())
        };
        if !headers.iter().any(|(existing, _)| *existing == name) {
            headers.push((name, value));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .and_then(|(_, value)| value.trim().parse::<usize>().ok());

    let (body, tail) = match content_length {
        Some(len) => {
            ensure!(
                rest.len() > len && rest.is_char_boundary(len) && rest.as_bytes()[len] == 0,
                UnterminatedBodySnafu {
                    stage: "decode-body-length",
                }
            );
            (&rest[..len], &rest[len + 1..])
        }
        None => {
            let end = rest.find('\0').context(UnterminatedBodySnafu {
                stage: "decode-body",
            })?;
            (&rest[..end], &rest[end + 1..])
        }
    };

    let frame = Frame {
        command,
        headers,
        body: body.to_string(),
    };
    Ok((frame, tail))
}

fn split_line(input: &str) -> Option<(&str, &str)> {
    let index = input.find('\n')?;
    let line = &input[..index];
    let line = line.strip_suffix('\r').unwrap_or(line);
    Some((line, &input[index + 1..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> ChannelResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let decoded = match chars.next() {
            Some('\\') => '\\',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('c') => ':',
            _ => {
                return InvalidEscapeSnafu {
                    stage: "decode-headers",
                    raw: raw.to_string(),
                }
                .fail();
            }
        };
        out.push(decoded);
    }
    Ok(out)
}
