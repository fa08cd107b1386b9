use twin_api::{HistoryPage, SessionId};

pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// One history fetch, stamped with the pager generation that issued it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub session_id: SessionId,
    pub page: u32,
    pub page_size: u32,
    generation: u64,
}

impl PageRequest {
    pub fn is_first_page(&self) -> bool {
        self.page == 0
    }
}

/// Pagination cursor for the active session.
///
/// Page 0 is the newest page. Every reset bumps the generation, so a
/// response issued for a previous session is recognised as stale.
#[derive(Debug, Clone)]
pub struct HistoryPager {
    session_id: Option<SessionId>,
    next_page: u32,
    page_size: u32,
    has_more: bool,
    loading: bool,
    generation: u64,
}

impl HistoryPager {
    pub fn new(page_size: u32) -> Self {
        Self {
            session_id: None,
            next_page: 0,
            page_size: page_size.max(1),
            has_more: false,
            loading: false,
            generation: 0,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn next_page(&self) -> u32 {
        self.next_page
    }

    /// Switches to `session_id` and returns the first-page request for it.
    pub fn reset(&mut self, session_id: Option<SessionId>) -> Option<PageRequest> {
        self.generation = self.generation.wrapping_add(1);
        self.session_id = session_id;
        self.next_page = 0;
        self.has_more = false;
        self.loading = false;

        let session_id = self.session_id.clone()?;
        Some(self.issue(session_id))
    }

    /// Binds a freshly created session that has no older history.
    pub fn adopt(&mut self, session_id: SessionId) {
        self.generation = self.generation.wrapping_add(1);
        self.session_id = Some(session_id);
        self.next_page = 1;
        self.has_more = false;
        self.loading = false;
    }

    /// Next older page, unless one is in flight or nothing is left. Until
    /// the first page has loaded this re-issues page 0.
    pub fn request_older(&mut self) -> Option<PageRequest> {
        if self.loading || (!self.has_more && !self.awaits_first_page()) {
            return None;
        }
        let session_id = self.session_id.clone()?;
        Some(self.issue(session_id))
    }

    /// Re-issues the first page when it has not loaded yet and nothing is in
    /// flight.
    pub fn retry_first_page(&mut self) -> Option<PageRequest> {
        if self.loading || !self.awaits_first_page() {
            return None;
        }
        let session_id = self.session_id.clone()?;
        Some(self.issue(session_id))
    }

    /// True while a session is bound but its newest page never loaded.
    pub fn awaits_first_page(&self) -> bool {
        self.session_id.is_some() && self.next_page == 0
    }

    /// Records a successful response. Returns `false` for stale responses,
    /// which the caller must discard.
    pub fn accept(&mut self, request: &PageRequest, page: &HistoryPage) -> bool {
        if !self.is_current(request) {
            tracing::debug!(
                session_id = %request.session_id,
                page = request.page,
                "discarding stale history page"
            );
            return false;
        }

        self.loading = false;
        self.has_more = page.has_more;
        self.next_page = request.page.saturating_add(1);
        true
    }

    /// Records a failed fetch so the next trigger can retry.
    pub fn fail(&mut self, request: &PageRequest) -> bool {
        if !self.is_current(request) {
            return false;
        }
        self.loading = false;
        true
    }

    fn is_current(&self, request: &PageRequest) -> bool {
        self.loading
            && request.generation == self.generation
            && request.page == self.next_page
            && self.session_id.as_ref() == Some(&request.session_id)
    }

    fn issue(&mut self, session_id: SessionId) -> PageRequest {
        self.loading = true;
        PageRequest {
            session_id,
            page: self.next_page,
            page_size: self.page_size,
            generation: self.generation,
        }
    }
}

impl Default for HistoryPager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(has_more: bool) -> HistoryPage {
        HistoryPage {
            turns: Vec::new(),
            has_more,
        }
    }

    fn session(raw: &str) -> SessionId {
        SessionId::new(raw).unwrap()
    }

    #[test]
    fn walks_pages_until_exhausted() {
        let mut pager = HistoryPager::new(30);
        let first = pager.reset(Some(session("s1"))).unwrap();
        assert_eq!((first.page, first.page_size), (0, 30));
        assert!(pager.request_older().is_none());

        assert!(pager.accept(&first, &page(true)));
        let second = pager.request_older().unwrap();
        assert_eq!(second.page, 1);
        assert!(pager.request_older().is_none(), "duplicate fetch while loading");

        assert!(pager.accept(&second, &page(false)));
        assert!(!pager.has_more());
        assert!(pager.request_older().is_none());
    }

    #[test]
    fn responses_for_a_previous_session_are_stale() {
        let mut pager = HistoryPager::new(30);
        let old = pager.reset(Some(session("s1"))).unwrap();
        let fresh = pager.reset(Some(session("s2"))).unwrap();

        assert!(!pager.accept(&old, &page(true)));
        assert!(pager.is_loading());
        assert!(pager.accept(&fresh, &page(true)));
        assert_eq!(pager.session_id(), Some(&session("s2")));
    }

    #[test]
    fn failure_allows_retry_of_the_same_page() {
        let mut pager = HistoryPager::new(30);
        let first = pager.reset(Some(session("s1"))).unwrap();
        pager.accept(&first, &page(true));

        let older = pager.request_older().unwrap();
        assert!(pager.fail(&older));
        assert!(pager.has_more());
        assert_eq!(pager.request_older().unwrap().page, older.page);
    }

    #[test]
    fn failed_first_page_stays_retryable() {
        let mut pager = HistoryPager::new(30);
        let first = pager.reset(Some(session("s1"))).unwrap();
        assert!(pager.retry_first_page().is_none(), "first page already in flight");

        assert!(pager.fail(&first));
        assert!(!pager.is_loading());
        assert!(pager.awaits_first_page());

        let retry = pager.request_older().unwrap();
        assert_eq!(retry.page, 0);
        assert!(pager.fail(&retry));
        let again = pager.retry_first_page().unwrap();
        assert_eq!(again.page, 0);

        assert!(pager.accept(&again, &page(false)));
        assert!(!pager.awaits_first_page());
        assert!(pager.retry_first_page().is_none());
        assert!(pager.request_older().is_none());
    }

    #[test]
    fn no_session_means_no_requests() {
        let mut pager = HistoryPager::default();
        assert!(pager.reset(None).is_none());
        assert!(pager.request_older().is_none());

        assert!(pager.retry_first_page().is_none());

        pager.adopt(session("fresh"));
        assert!(!pager.has_more());
        assert!(pager.request_older().is_none());
        assert!(pager.retry_first_page().is_none());
    }
}
