use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use uuid::Uuid;

use super::error::{ApiError, ApiResult, EmptyIdSnafu, InvalidIdSnafu};

/// Server-assigned identifier binding a sequence of turns.
///
/// The server owns the format, so the value is kept opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(raw: impl Into<String>) -> ApiResult<Self> {
        let raw = raw.into().trim().to_string();
        ensure!(
            !raw.is_empty(),
            EmptyIdSnafu {
                stage: "parse-session-id",
                id_type: "session-id",
            }
        );
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = ApiError;

    fn from_str(raw: &str) -> ApiResult<Self> {
        Self::new(raw)
    }
}

/// Client-generated correlation id linking an optimistic turn to the events
/// streamed back for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientMessageId(Uuid);

impl ClientMessageId {
    /// Mints a fresh random id for an outgoing question.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn parse(raw: &str) -> ApiResult<Self> {
        let parsed = Uuid::parse_str(raw.trim()).context(InvalidIdSnafu {
            stage: "parse-client-message-id",
            id_type: "client-message-id",
            raw: raw.to_string(),
        })?;
        Ok(Self(parsed))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ClientMessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

impl From<Uuid> for ClientMessageId {
    fn from(value: Uuid) -> Self {
        Self::new(value)
    }
}

impl FromStr for ClientMessageId {
    type Err = ApiError;

    fn from_str(raw: &str) -> ApiResult<Self> {
        Self::parse(raw)
    }
}
