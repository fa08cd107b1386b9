//! Interprets inbound channel events against the conversation state.
//!
//! `dispatch` is the only place protocol events mutate the store. It never
//! fails: unknown correlation ids, malformed ids and events arriving after
//! navigation are no-ops.

use twin_api::{ClientMessageId, SessionId};
use twin_stream::InboundEvent;

use crate::chat::message::{StreamState, StreamTransition, TurnStatus};
use crate::chat::store::MessageStore;

/// Answer text used when the server reports an error without a message.
pub const RESPONSE_FAILURE_MESSAGE: &str = "Sorry, I encountered an error. Please try again.";

/// State owned by one chat screen: turns, the bound session and the
/// in-flight stream flags.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    pub store: MessageStore,
    pub active_session: Option<SessionId>,
    pub stream: StreamState,
}

impl ConversationState {
    pub fn new(active_session: Option<SessionId>) -> Self {
        Self {
            active_session,
            ..Self::default()
        }
    }

    /// Applies a stream transition, logging and ignoring rejected ones.
    pub fn transition(&mut self, transition: StreamTransition) -> bool {
        match self.stream.apply(transition) {
            Ok(next) => {
                self.stream = next;
                true
            }
            Err(rejection) => {
                tracing::debug!(?rejection, "stream transition rejected");
                false
            }
        }
    }
}

/// Side effects the screen performs after a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A new session was bound; update the route and invalidate session lists.
    SessionCreated(SessionId),
    StreamStarted(ClientMessageId),
    AnswerUpdated(ClientMessageId),
    StreamCompleted(ClientMessageId),
    StreamFailed {
        client_message_id: ClientMessageId,
        message: String,
    },
}

pub fn dispatch(state: &mut ConversationState, event: InboundEvent) -> Vec<Effect> {
    match event {
        InboundEvent::SessionCreated {
            session_id,
            client_message_id,
        } => on_session_created(state, &session_id, client_message_id.as_deref()),
        InboundEvent::Start { client_message_id } => {
            on_start(state, client_message_id.as_deref())
        }
        InboundEvent::Delta {
            client_message_id,
            delta,
        } => on_delta(state, &client_message_id, &delta),
        InboundEvent::Done {
            client_message_id,
            full_text,
        } => on_done(state, &client_message_id, full_text),
        InboundEvent::Error {
            client_message_id,
            error,
            error_code,
        } => on_error(state, &client_message_id, error, error_code.as_deref()),
    }
}

fn on_session_created(
    state: &mut ConversationState,
    raw_session_id: &str,
    raw_client_message_id: Option<&str>,
) -> Vec<Effect> {
    if let Some(active) = &state.active_session {
        tracing::debug!(active = %active, "ignoring SESSION_CREATED for bound screen");
        return Vec::new();
    }

    let Ok(session_id) = SessionId::new(raw_session_id) else {
        tracing::debug!("ignoring SESSION_CREATED without a session id");
        return Vec::new();
    };

    let target = raw_client_message_id
        .and_then(|raw| ClientMessageId::parse(raw).ok())
        .filter(|id| state.store.find_by_correlation_id(*id).is_some())
        .or_else(|| state.store.last().and_then(|turn| turn.client_message_id));
    let Some(target) = target else {
        tracing::debug!(session_id = %session_id, "no pending turn to bind new session to");
        return Vec::new();
    };

    state.store.update_by_correlation_id(target, |turn| {
        turn.session_id = Some(session_id.clone());
    });
    state.active_session = Some(session_id.clone());
    tracing::info!(session_id = %session_id, client_message_id = %target, "session created");
    vec![Effect::SessionCreated(session_id)]
}

fn on_start(state: &mut ConversationState, raw_id: Option<&str>) -> Vec<Effect> {
    let id = match raw_id {
        Some(raw) => match ClientMessageId::parse(raw) {
            Ok(id) => id,
            Err(_) => return unmatched("START", raw),
        },
        None => match state.stream.active_id() {
            Some(id) => id,
            None => return Vec::new(),
        },
    };

    if !state.transition(StreamTransition::Begin(id)) {
        return Vec::new();
    }
    state.store.update_by_correlation_id(id, |turn| {
        if turn.status == TurnStatus::Pending {
            turn.status = TurnStatus::Streaming;
        }
    });
    vec![Effect::StreamStarted(id)]
}

fn on_delta(state: &mut ConversationState, raw_id: &str, delta: &str) -> Vec<Effect> {
    let Ok(id) = ClientMessageId::parse(raw_id) else {
        return unmatched("DELTA", raw_id);
    };

    let mut applied = false;
    let found = state.store.update_by_correlation_id(id, |turn| {
        if turn.status.is_terminal() {
            return;
        }
        turn.answer.push_str(delta);
        turn.status = TurnStatus::Streaming;
        applied = true;
    });
    if !found {
        return unmatched("DELTA", raw_id);
    }
    if !applied {
        tracing::debug!(client_message_id = %id, "ignoring DELTA after terminal event");
        return Vec::new();
    }

    let mut effects = Vec::with_capacity(2);
    if state.stream.is_awaiting() && state.transition(StreamTransition::Begin(id)) {
        effects.push(Effect::StreamStarted(id));
    }
    effects.push(Effect::AnswerUpdated(id));
    effects
}

fn on_done(state: &mut ConversationState, raw_id: &str, full_text: Option<String>) -> Vec<Effect> {
    let Ok(id) = ClientMessageId::parse(raw_id) else {
        return unmatched("DONE", raw_id);
    };

    let found = state.store.update_by_correlation_id(id, |turn| {
        if let Some(full_text) = full_text {
            turn.answer = full_text;
        }
        turn.status = TurnStatus::Done;
    });
    if !found {
        return unmatched("DONE", raw_id);
    }

    if state.stream.active_id() == Some(id) {
        state.transition(StreamTransition::Complete(id));
    }
    vec![Effect::StreamCompleted(id)]
}

fn on_error(
    state: &mut ConversationState,
    raw_id: &str,
    error: Option<String>,
    error_code: Option<&str>,
) -> Vec<Effect> {
    let Ok(id) = ClientMessageId::parse(raw_id) else {
        return unmatched("ERROR", raw_id);
    };

    let message = error
        .map(|error| error.trim().to_string())
        .filter(|error| !error.is_empty())
        .unwrap_or_else(|| RESPONSE_FAILURE_MESSAGE.to_string());

    let found = state.store.update_by_correlation_id(id, |turn| {
        turn.answer = message.clone();
        turn.status = TurnStatus::Error;
    });
    if !found {
        return unmatched("ERROR", raw_id);
    }

    tracing::warn!(client_message_id = %id, error_code, message = %message, "server failed the answer");
    if state.stream.active_id() == Some(id) {
        state.transition(StreamTransition::Fail {
            client_message_id: id,
            message: message.clone(),
        });
    }
    vec![Effect::StreamFailed {
        client_message_id: id,
        message,
    }]
}

fn unmatched(kind: &'static str, raw_id: &str) -> Vec<Effect> {
    tracing::debug!(kind, client_message_id = raw_id, "ignoring event with no matching turn");
    Vec::new()
}
