use chrono::{DateTime, Utc};
use twin_api::{ClientMessageId, HistoryTurn, SessionId};

/// Lifecycle status for one turn's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// Question sent, no answer content yet.
    Pending,
    Streaming,
    Done,
    Error,
    Cancelled,
}

impl TurnStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Pending | Self::Streaming)
    }
}

/// One question paired with its possibly partial answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub session_id: Option<SessionId>,
    /// Present only for turns created locally and awaiting events.
    pub client_message_id: Option<ClientMessageId>,
    pub question: String,
    pub answer: String,
    pub timestamp: DateTime<Utc>,
    pub status: TurnStatus,
}

impl Turn {
    /// Creates the optimistic turn appended before the question is sent.
    pub fn optimistic(
        session_id: Option<SessionId>,
        client_message_id: ClientMessageId,
        question: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            client_message_id: Some(client_message_id),
            question: question.into(),
            answer: String::new(),
            timestamp,
            status: TurnStatus::Pending,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }
}

impl From<HistoryTurn> for Turn {
    fn from(turn: HistoryTurn) -> Self {
        Self {
            session_id: turn.session_id,
            client_message_id: None,
            question: turn.question,
            answer: turn.answer,
            timestamp: turn.timestamp,
            status: TurnStatus::Done,
        }
    }
}

/// Screen-level streaming flags, keyed by the in-flight correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    /// Question sent; the typing indicator is shown.
    Awaiting(ClientMessageId),
    /// `START` or the first `DELTA` arrived.
    Streaming(ClientMessageId),
    Done(ClientMessageId),
    Error {
        client_message_id: ClientMessageId,
        message: String,
    },
    Cancelled(ClientMessageId),
}

/// State transition input for the stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Submit(ClientMessageId),
    Begin(ClientMessageId),
    Complete(ClientMessageId),
    Fail {
        client_message_id: ClientMessageId,
        message: String,
    },
    Cancel(ClientMessageId),
    ResetToIdle,
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyActive {
        active: ClientMessageId,
        attempted: ClientMessageId,
    },
    NoActiveStream,
    IdMismatch {
        active: ClientMessageId,
        attempted: ClientMessageId,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns the in-flight id while awaiting or streaming.
    pub fn active_id(&self) -> Option<ClientMessageId> {
        match self {
            Self::Awaiting(id) | Self::Streaming(id) => Some(*id),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => None,
        }
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self, Self::Awaiting(_))
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    pub fn is_active(&self) -> bool {
        self.active_id().is_some()
    }

    /// Applies one transition deterministically.
    ///
    /// A new submit is only accepted when nothing is in flight. Every other
    /// transition must name the in-flight id exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Submit(id) => self.apply_submit(id),
            StreamTransition::Begin(id) => self.apply_begin(id),
            StreamTransition::Complete(id) => self.finish(id, Self::Done(id)),
            StreamTransition::Fail {
                client_message_id,
                message,
            } => self.finish(
                client_message_id,
                Self::Error {
                    client_message_id,
                    message,
                },
            ),
            StreamTransition::Cancel(id) => self.finish(id, Self::Cancelled(id)),
            StreamTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_submit(&self, id: ClientMessageId) -> StreamTransitionResult {
        match self.active_id() {
            Some(active) => Err(StreamTransitionRejection::AlreadyActive {
                active,
                attempted: id,
            }),
            None => Ok(Self::Awaiting(id)),
        }
    }

    fn apply_begin(&self, id: ClientMessageId) -> StreamTransitionResult {
        match self.active_id() {
            Some(active) if active == id => Ok(Self::Streaming(id)),
            Some(active) => Err(StreamTransitionRejection::IdMismatch {
                active,
                attempted: id,
            }),
            None => Err(StreamTransitionRejection::NoActiveStream),
        }
    }

    fn finish(&self, id: ClientMessageId, next: StreamState) -> StreamTransitionResult {
        match self.active_id() {
            Some(active) if active == id => Ok(next),
            Some(active) => Err(StreamTransitionRejection::IdMismatch {
                active,
                attempted: id,
            }),
            None => Err(StreamTransitionRejection::NoActiveStream),
        }
    }
}
