pub mod channel;
pub mod error;
pub mod protocol;
pub mod socket;
pub mod stomp;

pub use channel::{
    ChannelConfig, ChatChannel, ConnectionState, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_RECONNECT_DELAY, DEFAULT_WS_URL, EventHandler,
};
pub use error::{ChannelError, ChannelResult};
pub use protocol::{
    CANCEL_DESTINATION, CHAT_DESTINATION, EVENTS_DESTINATION, InboundEvent, QuestionRequest,
};
pub use socket::{ChannelWorker, StompChannel};
