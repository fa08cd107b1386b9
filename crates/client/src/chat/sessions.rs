use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use twin_api::{ApiResult, SessionId, SessionSource, SessionSummary};

pub const DEFAULT_SESSION_CACHE_TTL: Duration = Duration::from_secs(30);

struct CacheEntry {
    sessions: Vec<SessionSummary>,
    fetched_at: Instant,
}

/// Short-lived session lists keyed by search query.
pub struct SessionListCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl SessionListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get_fresh(&self, query: &str) -> Option<Vec<SessionSummary>> {
        let entries = self.entries.read().await;
        entries.get(query).and_then(|entry| {
            if entry.fetched_at.elapsed() < self.ttl {
                Some(entry.sessions.clone())
            } else {
                None
            }
        })
    }

    pub async fn set(&self, query: &str, sessions: Vec<SessionSummary>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            query.to_string(),
            CacheEntry {
                sessions,
                fetched_at: Instant::now(),
            },
        );
    }

    pub async fn invalidate(&self) {
        self.entries.write().await.clear();
    }
}

impl Default for SessionListCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CACHE_TTL)
    }
}

/// Sidebar listing backed by the REST API and a [`SessionListCache`].
pub struct SessionDirectory {
    source: Arc<dyn SessionSource>,
    cache: SessionListCache,
}

impl SessionDirectory {
    pub fn new(source: Arc<dyn SessionSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: SessionListCache::new(ttl),
        }
    }

    pub async fn list(&self, search: Option<&str>) -> ApiResult<Vec<SessionSummary>> {
        let query = search.map(str::trim).unwrap_or_default();
        if let Some(sessions) = self.cache.get_fresh(query).await {
            tracing::debug!(query, count = sessions.len(), "session list served from cache");
            return Ok(sessions);
        }

        let search = (!query.is_empty()).then_some(query);
        let sessions = self.source.list_sessions(search).await?;
        self.cache.set(query, sessions.clone()).await;
        Ok(sessions)
    }

    pub async fn delete(&self, session_id: &SessionId) -> ApiResult<()> {
        self.source.delete_session(session_id).await?;
        self.cache.invalidate().await;
        Ok(())
    }

    pub async fn invalidate(&self) {
        self.cache.invalidate().await;
    }
}
