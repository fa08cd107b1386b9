use twin_api::SessionId;

use crate::chat::pager::PageRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Transient, non-blocking notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }
}

/// Work the screen asks its driver to perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenEffect {
    /// The active session changed; `None` is a new, unsaved conversation.
    RouteChanged(Option<SessionId>),
    InvalidateSessions,
    FetchPage(PageRequest),
    Notify(Notice),
}

/// One line of user input, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenCommand {
    Ask(String),
    Stop,
    NewConversation,
    Open(SessionId),
    ListSessions(Option<String>),
    Delete(SessionId),
    LoadOlder,
    Help,
    Quit,
    Invalid(String),
}

impl ScreenCommand {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(Self::Ask(line.to_string()));
        };

        let (name, argument) = match rest.split_once(char::is_whitespace) {
            Some((name, argument)) => (name, argument.trim()),
            None => (rest, ""),
        };

        let command = match name {
            "stop" => Self::Stop,
            "new" => Self::NewConversation,
            "more" => Self::LoadOlder,
            "help" => Self::Help,
            "quit" | "exit" => Self::Quit,
            "sessions" => {
                Self::ListSessions((!argument.is_empty()).then(|| argument.to_string()))
            }
            "open" | "delete" => match SessionId::new(argument) {
                Ok(session_id) if name == "open" => Self::Open(session_id),
                Ok(session_id) => Self::Delete(session_id),
                Err(_) => Self::Invalid(format!("/{name} needs a session id")),
            },
            other => Self::Invalid(format!("unknown command /{other}")),
        };
        Some(command)
    }
}
