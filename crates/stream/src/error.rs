use snafu::Snafu;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChannelError {
    #[snafu(display("invalid websocket URL '{raw}' on `{stage}`: {source}"))]
    InvalidUrl {
        stage: &'static str,
        raw: String,
        source: url::ParseError,
    },
    #[snafu(display("websocket URL '{raw}' needs a ws:// or wss:// scheme and a host"))]
    UnsupportedUrl { stage: &'static str, raw: String },
    #[snafu(display("unknown STOMP command '{command}'"))]
    UnknownCommand { stage: &'static str, command: String },
    #[snafu(display("STOMP frame is missing its header terminator on `{stage}`"))]
    UnterminatedHeaders { stage: &'static str },
    #[snafu(display("malformed STOMP header line '{line}'"))]
    MalformedHeader { stage: &'static str, line: String },
    #[snafu(display("invalid escape sequence in STOMP header '{raw}'"))]
    InvalidEscape { stage: &'static str, raw: String },
    #[snafu(display("STOMP frame body is not NUL terminated on `{stage}`"))]
    UnterminatedBody { stage: &'static str },
    #[snafu(display("failed to open websocket {url}: {source}"))]
    Connect {
        stage: &'static str,
        url: String,
        source: tungstenite::Error,
    },
    #[snafu(display("websocket write failed on `{stage}`: {source}"))]
    Write {
        stage: &'static str,
        source: tungstenite::Error,
    },
    #[snafu(display("websocket read failed on `{stage}`: {source}"))]
    Read {
        stage: &'static str,
        source: tungstenite::Error,
    },
    #[snafu(display("server closed the connection on `{stage}`"))]
    Closed { stage: &'static str },
    #[snafu(display("server did not complete the STOMP handshake in time"))]
    HandshakeTimeout { stage: &'static str },
    #[snafu(display("server reported a STOMP error: {message}"))]
    Rejected { stage: &'static str, message: String },
}

pub type ChannelResult<T> = Result<T, ChannelError>;
