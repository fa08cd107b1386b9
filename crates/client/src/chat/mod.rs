/// Typewriter reveal of streamed answers.
pub mod animator;
/// Maps inbound channel events onto the conversation state.
pub mod dispatcher;
/// Notices, screen effects and parsed user commands.
pub mod events;
/// Domain entities and deterministic stream state boundaries.
pub mod message;
pub mod pager;
pub mod runtime;
pub mod scroll_manager;
pub mod sessions;
pub mod store;
pub mod view;

pub use animator::{AnimationFrame, Animator, Reveal, Typewriter};
pub use dispatcher::{ConversationState, Effect, RESPONSE_FAILURE_MESSAGE, dispatch};
pub use events::{Notice, NoticeLevel, ScreenCommand, ScreenEffect};
pub use message::{
    StreamState, StreamTransition, StreamTransitionRejection, StreamTransitionResult, Turn,
    TurnStatus,
};
pub use pager::{HistoryPager, PageRequest};
pub use runtime::{ChatRuntime, RuntimeInput};
pub use scroll_manager::ScrollManager;
pub use sessions::{SessionDirectory, SessionListCache};
pub use store::MessageStore;
pub use view::{
    CONNECTION_LOST_MESSAGE, ChatScreen, NOT_CONNECTED_MESSAGE, RenderedTurn, ScreenConfig,
};
