use std::future::Future;
use std::pin::Pin;

pub mod auth;
pub mod error;
pub mod http;
pub mod ids;
pub mod types;

pub use auth::{AuthContext, TokenClaims, TokenStore};
pub use error::{ApiError, ApiResult, GENERIC_FAILURE_MESSAGE, extract_error_message};
pub use http::{DEFAULT_API_BASE_URL, DEFAULT_REQUEST_TIMEOUT, HttpApi};
pub use ids::{ClientMessageId, SessionId};
pub use types::{
    DEFAULT_SESSION_TITLE, HistoryPage, HistoryTurn, SessionSummary, parse_timestamp,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Paginated access to the past turns of one session.
pub trait HistorySource: Send + Sync {
    fn fetch_page<'a>(
        &'a self,
        session_id: &'a SessionId,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'a, ApiResult<HistoryPage>>;
}

/// Session listing and removal for the sidebar.
pub trait SessionSource: Send + Sync {
    fn list_sessions<'a>(
        &'a self,
        search: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<Vec<SessionSummary>>>;

    fn delete_session<'a>(&'a self, session_id: &'a SessionId) -> BoxFuture<'a, ApiResult<()>>;
}
