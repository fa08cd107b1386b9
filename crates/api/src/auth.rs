use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use snafu::ResultExt;

use super::error::{ApiResult, ReadTokenSnafu, WriteTokenSnafu};

pub const TOKEN_DIRECTORY_NAME: &str = "twin";
pub const TOKEN_FILE_NAME: &str = "token";

/// Claims read from the token payload. The signature is not verified here;
/// the server does that on every call.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

impl TokenClaims {
    pub fn decode(token: &str) -> Option<Self> {
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.exp.is_some_and(|exp| exp <= now.timestamp())
    }
}

/// Credentials injected into every component that talks to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    token: Option<String>,
    claims: Option<TokenClaims>,
}

impl AuthContext {
    pub fn new(token: Option<String>) -> Self {
        let token = token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let claims = token.as_deref().and_then(TokenClaims::decode);
        Self { token, claims }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn claims(&self) -> Option<&TokenClaims> {
        self.claims.as_ref()
    }

    /// Token to present, or `None` when absent or past its expiry.
    pub fn bearer_at(&self, now: DateTime<Utc>) -> Option<&str> {
        let token = self.token.as_deref()?;
        if self
            .claims
            .as_ref()
            .is_some_and(|claims| claims.is_expired_at(now))
        {
            return None;
        }
        Some(token)
    }

    pub fn bearer(&self) -> Option<&str> {
        self.bearer_at(Utc::now())
    }

    pub fn is_authenticated(&self) -> bool {
        self.bearer().is_some()
    }

    /// Name shown next to the user's own questions.
    pub fn display_name(&self) -> Option<&str> {
        let claims = self.claims.as_ref()?;
        Some(claims.username.as_deref().unwrap_or(&claims.sub))
    }
}

/// File-backed token persistence living next to the client settings.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(TOKEN_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".twin"))
            .join(TOKEN_FILE_NAME)
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> ApiResult<Option<String>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&self.path).context(ReadTokenSnafu {
            stage: "read-token-file",
            path: self.path.clone(),
        })?;
        let token = raw.trim();
        Ok((!token.is_empty()).then(|| token.to_string()))
    }

    pub fn save(&self, token: &str) -> ApiResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context(WriteTokenSnafu {
                stage: "create-token-directory",
                path: parent.to_path_buf(),
            })?;
        }

        std::fs::write(&self.path, token.trim()).context(WriteTokenSnafu {
            stage: "write-token-file",
            path: self.path.clone(),
        })?;
        tracing::debug!(path = ?self.path, "saved auth token");
        Ok(())
    }

    pub fn clear(&self) -> ApiResult<()> {
        if !self.path.exists() {
            return Ok(());
        }

        std::fs::remove_file(&self.path).context(WriteTokenSnafu {
            stage: "remove-token-file",
            path: self.path.clone(),
        })
    }
}
