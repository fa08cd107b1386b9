use std::path::PathBuf;

use snafu::Snafu;

/// Message shown when the server gives nothing more specific.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ApiError {
    #[snafu(display("{id_type} must not be empty"))]
    EmptyId {
        stage: &'static str,
        id_type: &'static str,
    },
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("no auth token available on `{stage}`"))]
    MissingToken { stage: &'static str },
    #[snafu(display("invalid API URL '{raw}' on `{stage}`: {source}"))]
    InvalidUrl {
        stage: &'static str,
        raw: String,
        source: url::ParseError,
    },
    #[snafu(display("API URL '{raw}' cannot carry path segments"))]
    InvalidBaseUrl { stage: &'static str, raw: String },
    #[snafu(display("failed to build http client: {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("request failed on `{stage}`: {source}"))]
    Request {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("{message}"))]
    Status {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("failed to decode response on `{stage}`: {source}"))]
    Decode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to read token file {path:?} on `{stage}`: {source}"))]
    ReadToken {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write token file {path:?} on `{stage}`: {source}"))]
    WriteToken {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Text suitable for a transient user-facing notice.
    pub fn user_message(&self) -> String {
        match self {
            Self::Status { message, .. } => message.clone(),
            Self::MissingToken { .. } => "Please sign in again.".to_string(),
            Self::Request { .. } | Self::BuildClient { .. } => {
                "Unable to reach the server. Please try again.".to_string()
            }
            _ => GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

/// Pulls a readable message out of an error response body.
///
/// Servers answer with `{"message": ...}`, a bare JSON string, or plain text
/// such as `401 UNAUTHORIZED "Current password is incorrect"`. A quoted
/// fragment wins; otherwise a leading status prefix is stripped.
pub fn extract_error_message(body: &str, fallback: &str) -> String {
    let raw = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(map)) => match map.get("message") {
            Some(serde_json::Value::String(message)) => message.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        Ok(serde_json::Value::String(message)) => message,
        _ => body.to_string(),
    };

    if let Some(quoted) = first_quoted(&raw) {
        return quoted.trim().to_string();
    }

    let stripped = strip_status_prefix(raw.trim());
    let unquoted = stripped.trim_matches('"').trim();
    if unquoted.is_empty() {
        fallback.to_string()
    } else {
        unquoted.to_string()
    }
}

fn first_quoted(raw: &str) -> Option<&str> {
    let start = raw.find('"')?;
    let tail = &raw[start + 1..];
    let end = tail.find('"')?;
    let candidate = &tail[..end];
    if candidate.is_empty() {
        None
    } else {
        Some(candidate)
    }
}

// Removes prefixes like `401 UNAUTHORIZED ` or `500 INTERNAL_SERVER_ERROR `.
fn strip_status_prefix(raw: &str) -> &str {
    let digits = raw.chars().take_while(char::is_ascii_digit).count();
    if digits != 3 {
        return raw;
    }

    let rest = &raw[digits..];
    if !rest.starts_with(char::is_whitespace) {
        return raw;
    }

    let rest = rest.trim_start();
    let reason_len = rest
        .char_indices()
        .find(|(_, ch)| !(ch.is_ascii_uppercase() || *ch == '_' || *ch == ' '))
        .map(|(index, _)| index)
        .unwrap_or(rest.len());

    // Keep the trailing word when it is the first word of the actual message.
    let reason = &rest[..reason_len];
    let cut = if reason_len == rest.len() {
        reason_len
    } else {
        reason.rfind(' ').map_or(0, |space| space + 1)
    };

    &rest[cut..]
}
