use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use twin_api::{ApiResult, ClientMessageId, HistoryPage, SessionId};
use twin_stream::{ChatChannel, ConnectionState, InboundEvent, QuestionRequest};

use crate::chat::animator::{
    AnimationFrame, Animator, DEFAULT_CHARS_PER_TICK, DEFAULT_TICK_INTERVAL, Reveal,
};
use crate::chat::dispatcher::{ConversationState, Effect, dispatch};
use crate::chat::events::{Notice, ScreenEffect};
use crate::chat::message::{StreamState, StreamTransition, Turn, TurnStatus};
use crate::chat::pager::{DEFAULT_PAGE_SIZE, HistoryPager, PageRequest};
use crate::chat::scroll_manager::{DEFAULT_NEAR_TOP_THRESHOLD, ScrollManager};

/// Answer shown when a question could not be sent.
pub const NOT_CONNECTED_MESSAGE: &str = "Not connected to the server. Please try again in a moment.";
/// Answer shown when the channel dropped while an answer was in flight.
pub const CONNECTION_LOST_MESSAGE: &str =
    "Connection lost before the answer finished. Please send your question again.";
const BUSY_MESSAGE: &str = "Please wait for the current answer to finish, or /stop it.";

/// Height of one rendered text row.
pub const ROW_HEIGHT: f32 = 20.0;
const WRAP_COLUMNS: usize = 80;

#[derive(Debug, Clone, PartialEq)]
pub struct ScreenConfig {
    pub page_size: u32,
    pub chars_per_tick: usize,
    pub tick_interval: Duration,
    pub viewport_height: f32,
    pub near_top_threshold: f32,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            chars_per_tick: DEFAULT_CHARS_PER_TICK,
            tick_interval: DEFAULT_TICK_INTERVAL,
            viewport_height: 30.0 * ROW_HEIGHT,
            near_top_threshold: DEFAULT_NEAR_TOP_THRESHOLD,
        }
    }
}

/// One turn as it should be drawn right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTurn<'a> {
    pub client_message_id: Option<ClientMessageId>,
    pub question: &'a str,
    pub answer: &'a str,
    pub status: TurnStatus,
    /// Reveal cursor; only on the last turn while its animation runs.
    pub cursor: bool,
}

/// Conversation screen: owns the turn store, pager, animator and scroll
/// state, and serializes every mutation coming from user input, channel
/// events, page loads and animation ticks.
pub struct ChatScreen {
    state: ConversationState,
    channel: Arc<dyn ChatChannel>,
    pager: HistoryPager,
    animator: Animator,
    scroll: ScrollManager,
    connection: ConnectionState,
    ever_connected: bool,
    outbox: Vec<ScreenEffect>,
}

impl ChatScreen {
    pub fn new(channel: Arc<dyn ChatChannel>, config: ScreenConfig) -> Self {
        Self {
            state: ConversationState::default(),
            channel,
            pager: HistoryPager::new(config.page_size),
            animator: Animator::new(config.chars_per_tick, config.tick_interval),
            scroll: ScrollManager::new(config.viewport_height, config.near_top_threshold),
            connection: ConnectionState::NotConnected,
            ever_connected: false,
            outbox: Vec::new(),
        }
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn turns(&self) -> &[Turn] {
        self.state.store.turns()
    }

    pub fn active_session(&self) -> Option<&SessionId> {
        self.state.active_session.as_ref()
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.state.stream
    }

    /// Typing indicator: a question is out and nothing has streamed yet.
    pub fn is_typing(&self) -> bool {
        self.state.stream.is_awaiting()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.stream.is_streaming()
    }

    pub fn pager(&self) -> &HistoryPager {
        &self.pager
    }

    pub fn scroll(&self) -> &ScrollManager {
        &self.scroll
    }

    pub fn animator(&self) -> &Animator {
        &self.animator
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Takes the effects queued since the last call.
    pub fn drain_effects(&mut self) -> Vec<ScreenEffect> {
        std::mem::take(&mut self.outbox)
    }

    /// Appends the optimistic turn, then sends the question. Returns the new
    /// correlation id, or `None` when nothing was submitted.
    pub fn submit(&mut self, question: &str) -> Option<ClientMessageId> {
        let question = question.trim();
        if question.is_empty() {
            return None;
        }
        if let Some(active) = self.state.stream.active_id() {
            tracing::debug!(client_message_id = %active, "submit ignored while answer in flight");
            self.notify(Notice::warning(BUSY_MESSAGE));
            return None;
        }

        let id = ClientMessageId::generate();
        let session_id = self.state.active_session.clone();
        let turn = Turn::optimistic(session_id.clone(), id, question, Utc::now());
        if !self.state.store.append(turn) {
            return None;
        }
        self.state.transition(StreamTransition::Submit(id));
        self.animator.start(id);
        self.scroll.request_scroll_to_bottom();

        let request = QuestionRequest::new(
            session_id.as_ref().map(ToString::to_string),
            question,
            id.to_string(),
        );
        if self.channel.send(&request) {
            tracing::info!(
                client_message_id = %id,
                session_id = ?session_id.as_ref().map(SessionId::as_str),
                "question sent"
            );
        } else {
            tracing::warn!(client_message_id = %id, "question not sent; channel offline");
            self.fail_turn(id, NOT_CONNECTED_MESSAGE);
            self.notify(Notice::error(NOT_CONNECTED_MESSAGE));
        }
        Some(id)
    }

    pub fn handle_event(&mut self, event: InboundEvent) {
        for effect in dispatch(&mut self.state, event) {
            match effect {
                Effect::SessionCreated(session_id) => {
                    self.pager.adopt(session_id.clone());
                    self.outbox.push(ScreenEffect::RouteChanged(Some(session_id)));
                    self.outbox.push(ScreenEffect::InvalidateSessions);
                }
                Effect::StreamStarted(id) => {
                    tracing::debug!(client_message_id = %id, "answer streaming");
                }
                Effect::AnswerUpdated(id) => {
                    if let Some(turn) = self.state.store.find_by_correlation_id(id) {
                        self.animator.set_target(id, &turn.answer);
                    }
                    self.scroll.request_scroll_to_bottom_if_following();
                }
                Effect::StreamCompleted(id) => {
                    if let Some(turn) = self.state.store.find_by_correlation_id(id) {
                        self.animator.finalize(id, &turn.answer);
                    }
                    self.scroll.request_scroll_to_bottom_if_following();
                }
                Effect::StreamFailed {
                    client_message_id,
                    message,
                } => {
                    if self.animator.owns(client_message_id) {
                        self.animator.cancel();
                    }
                    self.notify(Notice::error(message));
                }
            }
        }
    }

    /// Stops the in-flight answer, keeping whatever text already arrived.
    pub fn stop(&mut self) -> bool {
        let Some(id) = self.state.stream.active_id() else {
            return false;
        };

        if !self.channel.cancel(&id.to_string()) {
            tracing::debug!(client_message_id = %id, "cancel request not delivered");
        }
        self.state.store.update_by_correlation_id(id, |turn| {
            turn.status = TurnStatus::Cancelled;
        });
        self.state.transition(StreamTransition::Cancel(id));
        if self.animator.owns(id) {
            self.animator.cancel();
        }
        tracing::info!(client_message_id = %id, "answer stopped");
        true
    }

    pub fn on_connection_state(&mut self, state: ConnectionState) {
        let was_connected = self.connection.is_connected();
        self.connection = state;

        if state.is_connected() {
            if self.ever_connected && !was_connected {
                self.notify(Notice::info("Reconnected."));
            }
            self.ever_connected = true;
            return;
        }

        if was_connected {
            if let Some(id) = self.state.stream.active_id() {
                self.fail_turn(id, CONNECTION_LOST_MESSAGE);
            }
            if state != ConnectionState::Closed {
                self.notify(Notice::warning("Connection lost. Reconnecting..."));
            }
        } else if state == ConnectionState::Disconnected && !self.ever_connected {
            self.notify(Notice::warning(NOT_CONNECTED_MESSAGE));
            // Warn once until the first successful connect.
            self.ever_connected = true;
        }
    }

    /// Makes `session_id` the active conversation; `None` starts a new one.
    /// Pending page loads and animations of the previous session are dropped;
    /// the channel stays up. Reopening the active session only retries a
    /// first page that never loaded.
    pub fn switch_session(&mut self, session_id: Option<SessionId>) {
        if session_id.is_some() && session_id == self.state.active_session {
            if let Some(request) = self.pager.retry_first_page() {
                tracing::debug!(session_id = %request.session_id, "retrying first history page");
                self.outbox.push(ScreenEffect::FetchPage(request));
            }
            return;
        }

        self.animator.reset();
        self.state = ConversationState::new(session_id.clone());
        self.scroll.reset();
        if let Some(request) = self.pager.reset(session_id.clone()) {
            self.outbox.push(ScreenEffect::FetchPage(request));
        }
        tracing::info!(session_id = ?session_id.as_ref().map(SessionId::as_str), "switched session");
        self.outbox.push(ScreenEffect::RouteChanged(session_id));
    }

    /// Records a user scroll; crossing the near-top threshold loads older turns.
    pub fn on_scroll(&mut self, offset: f32) -> bool {
        self.scroll.on_scroll(offset) && self.load_older()
    }

    pub fn load_older(&mut self) -> bool {
        match self.pager.request_older() {
            Some(request) => {
                self.outbox.push(ScreenEffect::FetchPage(request));
                true
            }
            None => false,
        }
    }

    pub fn apply_page(&mut self, request: PageRequest, result: ApiResult<HistoryPage>) {
        match result {
            Ok(page) => {
                if !self.pager.accept(&request, &page) {
                    return;
                }

                let has_more = page.has_more;
                let turns = page
                    .turns
                    .into_iter()
                    .map(|turn| {
                        let mut turn = Turn::from(turn);
                        turn.session_id
                            .get_or_insert_with(|| request.session_id.clone());
                        turn
                    })
                    .collect();

                if request.is_first_page() {
                    self.scroll.request_scroll_to_bottom();
                } else {
                    self.scroll.begin_prepend();
                }
                let inserted = self.state.store.prepend_page(turns);
                tracing::debug!(
                    session_id = %request.session_id,
                    page = request.page,
                    inserted,
                    has_more,
                    "history page applied"
                );
            }
            Err(error) => {
                if !self.pager.fail(&request) {
                    return;
                }
                tracing::warn!(
                    session_id = %request.session_id,
                    page = request.page,
                    error = %error,
                    "history fetch failed"
                );
                self.notify(Notice::error(error.user_message()));
            }
        }
    }

    pub async fn next_animation_frame(&mut self) -> AnimationFrame {
        self.animator.next_frame().await
    }

    pub fn on_animation_frame(&mut self, frame: AnimationFrame) {
        match frame.reveal {
            Reveal::Advanced => self.scroll.request_scroll_to_bottom_if_following(),
            Reveal::Completed => {
                tracing::debug!(client_message_id = %frame.owner, "answer fully revealed");
            }
            Reveal::CaughtUp | Reveal::Idle => {}
        }
    }

    /// Content height of the current rendering.
    pub fn content_height(&self) -> f32 {
        self.render()
            .iter()
            .map(|turn| (wrapped_rows(turn.question) + wrapped_rows(turn.answer) + 1) as f32)
            .sum::<f32>()
            * ROW_HEIGHT
    }

    /// Applies scroll adjustments once the new content is laid out.
    pub fn on_layout(&mut self) -> f32 {
        let height = self.content_height();
        self.scroll.on_layout(height)
    }

    pub fn render(&self) -> Vec<RenderedTurn<'_>> {
        let turns = self.state.store.turns();
        let last_index = turns.len().saturating_sub(1);

        turns
            .iter()
            .enumerate()
            .map(|(index, turn)| {
                let animating = turn
                    .client_message_id
                    .is_some_and(|id| self.animator.is_animating(id));
                let answer = turn
                    .client_message_id
                    .filter(|_| animating)
                    .and_then(|id| self.animator.visible_for(id))
                    .unwrap_or(turn.answer.as_str());

                RenderedTurn {
                    client_message_id: turn.client_message_id,
                    question: &turn.question,
                    answer,
                    status: turn.status,
                    cursor: animating && index == last_index,
                }
            })
            .collect()
    }

    fn fail_turn(&mut self, id: ClientMessageId, message: &str) {
        self.state.store.update_by_correlation_id(id, |turn| {
            turn.answer = message.to_string();
            turn.status = TurnStatus::Error;
        });
        if self.state.stream.active_id() == Some(id) {
            self.state.transition(StreamTransition::Fail {
                client_message_id: id,
                message: message.to_string(),
            });
        }
        if self.animator.owns(id) {
            self.animator.cancel();
        }
    }

    fn notify(&mut self, notice: Notice) {
        self.outbox.push(ScreenEffect::Notify(notice));
    }
}

fn wrapped_rows(text: &str) -> usize {
    text.lines()
        .map(|line| line.chars().count().div_ceil(WRAP_COLUMNS).max(1))
        .sum::<usize>()
        .max(1)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use twin_stream::EventHandler;

    use super::*;

    #[derive(Default)]
    struct FakeChannel {
        offline: AtomicBool,
        cancelled: Mutex<Vec<String>>,
    }

    impl ChatChannel for FakeChannel {
        fn send(&self, _: &QuestionRequest) -> bool {
            !self.offline.load(Ordering::SeqCst)
        }

        fn cancel(&self, client_message_id: &str) -> bool {
            self.cancelled
                .lock()
                .unwrap()
                .push(client_message_id.to_string());
            true
        }

        fn is_connected(&self) -> bool {
            !self.offline.load(Ordering::SeqCst)
        }

        fn set_handler(&self, _: EventHandler) {}

        fn disconnect(&self) {}
    }

    fn screen() -> (ChatScreen, Arc<FakeChannel>) {
        let channel = Arc::new(FakeChannel::default());
        let mut screen = ChatScreen::new(channel.clone(), ScreenConfig::default());
        screen.on_connection_state(ConnectionState::Connected);
        (screen, channel)
    }

    fn delta(id: ClientMessageId, text: &str) -> InboundEvent {
        InboundEvent::Delta {
            client_message_id: id.to_string(),
            delta: text.to_string(),
        }
    }

    #[test]
    fn second_submit_waits_for_the_first_answer() {
        let (mut screen, _) = screen();
        screen.submit("one").unwrap();

        assert!(screen.submit("two").is_none());
        assert_eq!(screen.turns().len(), 1);
        assert!(matches!(
            screen.drain_effects().as_slice(),
            [ScreenEffect::Notify(_)]
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_keeps_partial_answer_and_sends_cancel() {
        let (mut screen, channel) = screen();
        let id = screen.submit("q").unwrap();
        screen.handle_event(delta(id, "partial"));

        assert!(screen.stop());
        let turn = screen.turns().last().unwrap();
        assert_eq!(turn.status, TurnStatus::Cancelled);
        assert_eq!(turn.answer, "partial");
        assert!(!screen.is_streaming());
        assert_eq!(channel.cancelled.lock().unwrap().as_slice(), [id.to_string()]);
        assert!(!screen.stop());
    }

    #[test]
    fn connection_loss_fails_in_flight_turn() {
        let (mut screen, _) = screen();
        let id = screen.submit("q").unwrap();

        screen.on_connection_state(ConnectionState::Disconnected);

        let turn = screen.turns().last().unwrap();
        assert_eq!(turn.answer, CONNECTION_LOST_MESSAGE);
        assert!(!screen.is_typing());

        // A late DONE still wins.
        screen.handle_event(InboundEvent::Done {
            client_message_id: id.to_string(),
            full_text: Some("recovered".to_string()),
        });
        assert_eq!(screen.turns().last().unwrap().answer, "recovered");
    }

    #[test]
    fn cursor_shows_only_while_last_turn_animates() {
        let (mut screen, _) = screen();
        let id = screen.submit("q").unwrap();

        let rendered = screen.render();
        assert_eq!(rendered[0].answer, "");
        assert!(rendered[0].cursor);

        screen.handle_event(InboundEvent::Error {
            client_message_id: id.to_string(),
            error: Some("boom".to_string()),
            error_code: None,
        });
        let rendered = screen.render();
        assert_eq!(rendered[0].answer, "boom");
        assert!(!rendered[0].cursor);
    }

    #[test]
    fn switching_session_requests_first_page() {
        let (mut screen, _) = screen();
        screen.submit("q").unwrap();
        screen.drain_effects();

        let session_id = SessionId::new("s1").unwrap();
        screen.switch_session(Some(session_id.clone()));

        assert!(screen.turns().is_empty());
        assert!(!screen.is_typing());
        let effects = screen.drain_effects();
        assert!(matches!(
            &effects[0],
            ScreenEffect::FetchPage(request) if request.page == 0 && request.session_id == session_id
        ));
        assert_eq!(effects[1], ScreenEffect::RouteChanged(Some(session_id)));
    }

    fn fetch_failed() -> ApiResult<HistoryPage> {
        Err(twin_api::ApiError::Status {
            stage: "fetch-history",
            status: 503,
            message: "History is unavailable.".to_string(),
        })
    }

    fn history_page(range: std::ops::Range<i64>, has_more: bool) -> HistoryPage {
        let base = Utc::now() - chrono::Duration::days(1);
        HistoryPage {
            turns: range
                .map(|index| twin_api::HistoryTurn {
                    session_id: None,
                    question: format!("q{index}"),
                    answer: format!("a{index}"),
                    timestamp: base + chrono::Duration::seconds(index),
                })
                .collect(),
            has_more,
        }
    }

    fn fetch_requests(effects: &[ScreenEffect]) -> Vec<&PageRequest> {
        effects
            .iter()
            .filter_map(|effect| match effect {
                ScreenEffect::FetchPage(request) => Some(request),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn failed_first_page_can_be_retried() {
        let (mut screen, _) = screen();
        let session_id = SessionId::new("s1").unwrap();
        screen.switch_session(Some(session_id.clone()));
        let first = fetch_requests(&screen.drain_effects())[0].clone();

        screen.apply_page(first, fetch_failed());
        assert!(screen.turns().is_empty());
        assert!(!screen.pager().is_loading());
        assert!(matches!(
            screen.drain_effects().as_slice(),
            [ScreenEffect::Notify(notice)] if notice.message == "History is unavailable."
        ));

        // Reopening the same conversation retries the newest page.
        screen.switch_session(Some(session_id.clone()));
        let effects = screen.drain_effects();
        let retry = fetch_requests(&effects);
        assert_eq!(retry.len(), 1);
        assert_eq!(retry[0].page, 0);
        assert!(!effects.iter().any(|effect| matches!(effect, ScreenEffect::RouteChanged(_))));

        screen.apply_page(retry[0].clone(), fetch_failed());
        screen.drain_effects();
        assert!(screen.load_older());
        let again = fetch_requests(&screen.drain_effects())[0].clone();
        assert_eq!(again.page, 0);

        screen.apply_page(again, Ok(history_page(0..3, false)));
        assert_eq!(screen.turns().len(), 3);
        screen.switch_session(Some(session_id));
        assert!(screen.drain_effects().is_empty());
    }

    #[test]
    fn failed_older_page_keeps_turns_and_allows_retry() {
        let (mut screen, _) = screen();
        screen.switch_session(Some(SessionId::new("s1").unwrap()));
        let first = fetch_requests(&screen.drain_effects())[0].clone();
        screen.apply_page(first, Ok(history_page(10..20, true)));
        let before: Vec<String> = screen.turns().iter().map(|turn| turn.question.clone()).collect();

        assert!(screen.load_older());
        let older = fetch_requests(&screen.drain_effects())[0].clone();
        assert_eq!(older.page, 1);
        assert!(!screen.load_older(), "no second fetch while one is in flight");

        screen.apply_page(older.clone(), fetch_failed());
        let after: Vec<String> = screen.turns().iter().map(|turn| turn.question.clone()).collect();
        assert_eq!(after, before);
        assert!(!screen.pager().is_loading());
        assert!(matches!(
            screen.drain_effects().as_slice(),
            [ScreenEffect::Notify(_)]
        ));

        assert!(screen.load_older());
        let retry = fetch_requests(&screen.drain_effects())[0].clone();
        assert_eq!(retry.page, older.page);
        screen.apply_page(retry, Ok(history_page(0..10, false)));
        assert_eq!(screen.turns().len(), 20);
        assert_eq!(screen.turns()[0].question, "q0");
    }
}
