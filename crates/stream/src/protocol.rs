use serde::{Deserialize, Serialize};

/// Per-user queue the server pushes streaming events to.
pub const EVENTS_DESTINATION: &str = "/user/queue/twin.events";
/// Application destination that accepts new questions.
pub const CHAT_DESTINATION: &str = "/app/twin.chat";
/// Application destination that stops an in-flight generation.
pub const CANCEL_DESTINATION: &str = "/app/twin.cancel";

/// Outbound question. `session_id` is omitted for the first turn of a new
/// conversation; the server answers with `SESSION_CREATED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub user_question: String,
    pub client_message_id: String,
}

impl QuestionRequest {
    pub fn new(
        session_id: Option<String>,
        user_question: impl Into<String>,
        client_message_id: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            user_question: user_question.into(),
            client_message_id: client_message_id.into(),
        }
    }
}

/// Server-pushed event, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InboundEvent {
    #[serde(rename_all = "camelCase")]
    SessionCreated {
        session_id: String,
        #[serde(default)]
        client_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Start {
        #[serde(default)]
        client_message_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Delta {
        client_message_id: String,
        #[serde(default)]
        delta: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        client_message_id: String,
        #[serde(default)]
        full_text: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        client_message_id: String,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        error_code: Option<String>,
    },
}

impl InboundEvent {
    pub fn decode(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionCreated { .. } => "SESSION_CREATED",
            Self::Start { .. } => "START",
            Self::Delta { .. } => "DELTA",
            Self::Done { .. } => "DONE",
            Self::Error { .. } => "ERROR",
        }
    }

    /// Correlation id the event targets, when it names one.
    pub fn client_message_id(&self) -> Option<&str> {
        match self {
            Self::SessionCreated {
                client_message_id, ..
            }
            | Self::Start { client_message_id } => client_message_id.as_deref(),
            Self::Delta {
                client_message_id, ..
            }
            | Self::Done {
                client_message_id, ..
            }
            | Self::Error {
                client_message_id, ..
            } => Some(client_message_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_each_event_kind() {
        let created = InboundEvent::decode(
            r#"{"type":"SESSION_CREATED","sessionId":"s-1","timestamp":1700000000}"#,
        )
        .unwrap();
        assert_eq!(
            created,
            InboundEvent::SessionCreated {
                session_id: "s-1".to_string(),
                client_message_id: None,
            }
        );

        let delta =
            InboundEvent::decode(r#"{"type":"DELTA","clientMessageId":"c-1","delta":"Hel"}"#)
                .unwrap();
        assert_eq!(delta.kind(), "DELTA");
        assert_eq!(delta.client_message_id(), Some("c-1"));

        let done = InboundEvent::decode(r#"{"type":"DONE","clientMessageId":"c-1"}"#).unwrap();
        assert_eq!(
            done,
            InboundEvent::Done {
                client_message_id: "c-1".to_string(),
                full_text: None,
            }
        );

        let error = InboundEvent::decode(
            r#"{"type":"ERROR","clientMessageId":"c-1","error":"quota","errorCode":"E429"}"#,
        )
        .unwrap();
        assert!(matches!(
            error,
            InboundEvent::Error { error: Some(ref text), .. } if text == "quota"
        ));
    }

    #[test]
    fn rejects_unknown_or_malformed_events() {
        assert!(InboundEvent::decode(r#"{"type":"PING"}"#).is_err());
        assert!(InboundEvent::decode(r#"{"type":"DELTA"}"#).is_err());
        assert!(InboundEvent::decode("not json").is_err());
    }

    #[test]
    fn question_omits_session_for_new_conversation() {
        let request = QuestionRequest::new(None, "hi", "c-1");
        let body = serde_json::to_string(&request).unwrap();
        assert_eq!(body, r#"{"userQuestion":"hi","clientMessageId":"c-1"}"#);

        let request = QuestionRequest::new(Some("s-1".to_string()), "hi", "c-1");
        let body = serde_json::to_string(&request).unwrap();
        assert!(body.starts_with(r#"{"sessionId":"s-1","#));
    }
}
