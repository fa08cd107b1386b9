use std::fmt;
use std::time::Duration;

use snafu::{OptionExt, ResultExt, ensure};
use url::Url;

use crate::error::{ChannelResult, InvalidUrlSnafu, UnsupportedUrlSnafu};
use crate::protocol::{
    CANCEL_DESTINATION, CHAT_DESTINATION, EVENTS_DESTINATION, InboundEvent, QuestionRequest,
};

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_WS_HOST: &str = "localhost";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    ws_url: String,
    host: String,
    pub reconnect_delay: Duration,
    pub handshake_timeout: Duration,
    pub events_destination: String,
    pub chat_destination: String,
    pub cancel_destination: String,
}

impl ChannelConfig {
    /// Validates `ws_url` as a `ws://` or `wss://` URL with a host.
    pub fn new(ws_url: &str) -> ChannelResult<Self> {
        let raw = ws_url.trim();
        let url = Url::parse(raw).context(InvalidUrlSnafu {
            stage: "parse-ws-url",
            raw,
        })?;
        ensure!(
            matches!(url.scheme(), "ws" | "wss"),
            UnsupportedUrlSnafu {
                stage: "check-ws-scheme",
                raw,
            }
        );
        let host = url.host_str().context(UnsupportedUrlSnafu {
            stage: "check-ws-host",
            raw,
        })?;

        Ok(Self {
            ws_url: raw.to_string(),
            host: host.to_string(),
            ..Self::default()
        })
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }

    /// Value for the STOMP `host` header, taken from the websocket URL.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            host: DEFAULT_WS_HOST.to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            events_destination: EVENTS_DESTINATION.to_string(),
            chat_destination: CHAT_DESTINATION.to_string(),
            cancel_destination: CANCEL_DESTINATION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::NotConnected => "not connected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

/// Callback receiving every decoded server event. Swapped atomically so the
/// connection never has to be rebuilt when the consumer changes.
pub struct EventHandler(Box<dyn Fn(InboundEvent) + Send + Sync>);

impl EventHandler {
    pub fn new(handler: impl Fn(InboundEvent) + Send + Sync + 'static) -> Self {
        Self(Box::new(handler))
    }

    pub fn noop() -> Self {
        Self::new(|event| {
            tracing::debug!(kind = event.kind(), "dropping event with no handler installed");
        })
    }

    pub fn handle(&self, event: InboundEvent) {
        (self.0)(event)
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler")
    }
}

/// Bidirectional chat transport as seen by the conversation screen.
pub trait ChatChannel: Send + Sync {
    /// Publishes a question. Returns `false` without sending when the
    /// channel is not connected.
    fn send(&self, request: &QuestionRequest) -> bool;

    /// Asks the server to stop generating for `client_message_id`.
    fn cancel(&self, client_message_id: &str) -> bool;

    fn is_connected(&self) -> bool;

    /// Replaces the event callback without reconnecting.
    fn set_handler(&self, handler: EventHandler);

    /// Stops reconnecting and closes the socket. Idempotent.
    fn disconnect(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::error::ChannelError;

    fn host_of(raw: &str) -> String {
        ChannelConfig::new(raw).unwrap().host().to_string()
    }

    #[test]
    fn host_is_derived_from_ws_url() {
        assert_eq!(host_of("ws://localhost:8080/ws"), "localhost");
        assert_eq!(host_of("wss://twin.example.com/ws"), "twin.example.com");
        assert_eq!(host_of("ws://[::1]:8080/ws"), "[::1]");
        assert_eq!(host_of(" ws://user@10.0.0.2:9000/ws "), "10.0.0.2");
        assert_eq!(ChannelConfig::new(DEFAULT_WS_URL).unwrap(), ChannelConfig::default());
    }

    #[test]
    fn rejects_urls_that_cannot_carry_a_websocket() {
        assert!(matches!(
            ChannelConfig::new("not a url"),
            Err(ChannelError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ChannelConfig::new("http://localhost:8080/ws"),
            Err(ChannelError::UnsupportedUrl { .. })
        ));
        assert!(matches!(
            ChannelConfig::new("localhost:9000"),
            Err(ChannelError::UnsupportedUrl { .. })
        ));
    }

    #[test]
    fn only_connected_state_accepts_sends() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(!ConnectionState::NotConnected.is_connected());
    }
}
