use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt, ensure};
use url::Url;

use crate::auth::AuthContext;
use crate::error::{
    ApiResult, BuildClientSnafu, DecodeSnafu, GENERIC_FAILURE_MESSAGE, InvalidBaseUrlSnafu,
    InvalidUrlSnafu, MissingTokenSnafu, RequestSnafu, StatusSnafu, extract_error_message,
};
use crate::ids::SessionId;
use crate::types::{HistoryPage, SessionSummary};
use crate::{BoxFuture, HistorySource, SessionSource};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for the chat history and session endpoints.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: Url,
    auth: AuthContext,
}

impl HttpApi {
    pub fn new(base_url: &str, auth: AuthContext, timeout: Duration) -> ApiResult<Self> {
        let raw = base_url.trim();
        let base_url = Url::parse(raw).context(InvalidUrlSnafu {
            stage: "parse-api-base-url",
            raw: raw.to_string(),
        })?;
        ensure!(
            !base_url.cannot_be_a_base(),
            InvalidBaseUrlSnafu {
                stage: "parse-api-base-url",
                raw: raw.to_string(),
            }
        );

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-http-client",
            })?;

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    /// Fetches one page of past turns; page 0 is the most recent.
    pub async fn history(
        &self,
        session_id: &SessionId,
        page: u32,
        page_size: u32,
    ) -> ApiResult<HistoryPage> {
        let url = self.endpoint(&["chat", "sessions", session_id.as_str(), "messages"])?;
        let request = self
            .client
            .get(url)
            .query(&[("page", page.to_string()), ("size", page_size.to_string())]);

        let mut history: HistoryPage = self.send_json(request, "fetch-history").await?;
        // Pages are rendered oldest first even if the server sorts differently.
        history.turns.sort_by_key(|turn| turn.timestamp);
        tracing::debug!(
            session_id = %session_id,
            page,
            turn_count = history.turns.len(),
            has_more = history.has_more,
            "fetched history page"
        );
        Ok(history)
    }

    pub async fn sessions(&self, search: Option<&str>) -> ApiResult<Vec<SessionSummary>> {
        let url = self.endpoint(&["chat", "sessions"])?;
        let mut request = self.client.get(url);
        if let Some(search) = search.map(str::trim).filter(|search| !search.is_empty()) {
            request = request.query(&[("search", search)]);
        }

        self.send_json(request, "list-sessions").await
    }

    pub async fn delete_session(&self, session_id: &SessionId) -> ApiResult<()> {
        let url = self.endpoint(&["chat", "sessions", session_id.as_str()])?;
        let response = self
            .authorize(self.client.delete(url), "delete-session")?
            .send()
            .await
            .context(RequestSnafu {
                stage: "delete-session",
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return StatusSnafu {
                stage: "delete-session-status",
                status: status.as_u16(),
                message: extract_error_message(&body, GENERIC_FAILURE_MESSAGE),
            }
            .fail();
        }

        tracing::info!(session_id = %session_id, "deleted session");
        Ok(())
    }

    fn endpoint(&self, parts: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().ok().context(InvalidBaseUrlSnafu {
                stage: "build-endpoint",
                raw: self.base_url.to_string(),
            })?;
            segments.pop_if_empty().extend(parts);
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder, stage: &'static str) -> ApiResult<RequestBuilder> {
        let token = self.auth.bearer().context(MissingTokenSnafu { stage })?;
        Ok(request.bearer_auth(token))
    }

    async fn send_json<T>(&self, request: RequestBuilder, stage: &'static str) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let response = self
            .authorize(request, stage)?
            .send()
            .await
            .context(RequestSnafu { stage })?;

        let status = response.status();
        let body = response.text().await.context(RequestSnafu { stage })?;

        if !status.is_success() {
            tracing::warn!(stage, status = status.as_u16(), "api request rejected");
            return StatusSnafu {
                stage,
                status: status.as_u16(),
                message: extract_error_message(&body, GENERIC_FAILURE_MESSAGE),
            }
            .fail();
        }

        serde_json::from_str(&body).context(DecodeSnafu { stage })
    }
}

impl HistorySource for HttpApi {
    fn fetch_page<'a>(
        &'a self,
        session_id: &'a SessionId,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'a, ApiResult<HistoryPage>> {
        Box::pin(self.history(session_id, page, page_size))
    }
}

impl SessionSource for HttpApi {
    fn list_sessions<'a>(
        &'a self,
        search: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<Vec<SessionSummary>>> {
        Box::pin(self.sessions(search))
    }

    fn delete_session<'a>(&'a self, session_id: &'a SessionId) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(HttpApi::delete_session(self, session_id))
    }
}
