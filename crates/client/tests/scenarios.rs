use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tokio::sync::watch;
use twin_api::{
    ApiResult, BoxFuture, ClientMessageId, HistoryPage, HistorySource, HistoryTurn, SessionId,
    SessionSource, SessionSummary,
};
use twin_client::chat::{
    Animator, ChatRuntime, ChatScreen, NOT_CONNECTED_MESSAGE, Reveal, RuntimeInput,
    ScreenConfig, ScreenEffect, SessionDirectory, StreamState, Turn, TurnStatus, dispatch,
};
use twin_client::chat::dispatcher::ConversationState;
use twin_client::chat::store::MessageStore;
use twin_stream::{ChatChannel, ConnectionState, EventHandler, InboundEvent, QuestionRequest};

#[derive(Default)]
struct FakeChannel {
    offline: AtomicBool,
    sent: Mutex<Vec<QuestionRequest>>,
    handler: Mutex<Option<EventHandler>>,
    /// Delta pushed back synchronously from inside `send`.
    echo: Mutex<Option<String>>,
}

impl FakeChannel {
    fn online() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn offline() -> Arc<Self> {
        let channel = Self::default();
        channel.offline.store(true, Ordering::SeqCst);
        Arc::new(channel)
    }

    fn emit(&self, event: InboundEvent) {
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            handler.handle(event);
        }
    }

    fn sent(&self) -> Vec<QuestionRequest> {
        self.sent.lock().unwrap().clone()
    }
}

impl ChatChannel for FakeChannel {
    fn send(&self, request: &QuestionRequest) -> bool {
        if self.offline.load(Ordering::SeqCst) {
            return false;
        }
        self.sent.lock().unwrap().push(request.clone());
        if let Some(delta) = self.echo.lock().unwrap().clone() {
            self.emit(InboundEvent::Delta {
                client_message_id: request.client_message_id.clone(),
                delta,
            });
        }
        true
    }

    fn cancel(&self, _: &str) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    fn is_connected(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    fn set_handler(&self, handler: EventHandler) {
        *self.handler.lock().unwrap() = Some(handler);
    }

    fn disconnect(&self) {
        self.offline.store(true, Ordering::SeqCst);
    }
}

/// Server-side history of `total` turns, newest page first.
struct FakeHistory {
    turns: Vec<HistoryTurn>,
}

impl FakeHistory {
    fn with_turns(total: usize) -> Arc<Self> {
        let turns = (0..total)
            .map(|index| HistoryTurn {
                session_id: Some(SessionId::new("s1").unwrap()),
                question: format!("question {index}"),
                answer: format!("answer {index}"),
                timestamp: Utc.timestamp_opt(1_700_000_000 + index as i64 * 60, 0).unwrap(),
            })
            .collect();
        Arc::new(Self { turns })
    }
}

impl HistorySource for FakeHistory {
    fn fetch_page<'a>(
        &'a self,
        _: &'a SessionId,
        page: u32,
        page_size: u32,
    ) -> BoxFuture<'a, ApiResult<HistoryPage>> {
        let end = self
            .turns
            .len()
            .saturating_sub(page as usize * page_size as usize);
        let start = end.saturating_sub(page_size as usize);
        let turns = self.turns[start..end].to_vec();
        Box::pin(async move {
            Ok(HistoryPage {
                turns,
                has_more: start > 0,
            })
        })
    }
}

impl SessionSource for FakeHistory {
    fn list_sessions<'a>(
        &'a self,
        _: Option<&'a str>,
    ) -> BoxFuture<'a, ApiResult<Vec<SessionSummary>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn delete_session<'a>(&'a self, _: &'a SessionId) -> BoxFuture<'a, ApiResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

fn connected_screen(channel: Arc<FakeChannel>) -> ChatScreen {
    let mut screen = ChatScreen::new(channel, ScreenConfig::default());
    screen.on_connection_state(ConnectionState::Connected);
    screen
}

fn runtime(
    channel: Arc<FakeChannel>,
    history: Arc<FakeHistory>,
) -> (ChatRuntime, watch::Sender<ConnectionState>) {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);
    let sessions = SessionDirectory::new(history.clone(), Duration::from_secs(30));
    let runtime = ChatRuntime::new(channel, state_rx, history, sessions, ScreenConfig::default());
    (runtime, state_tx)
}

async fn next_page(runtime: &mut ChatRuntime) {
    loop {
        let input = runtime.next_input().await;
        let is_page = matches!(input, RuntimeInput::Page { .. });
        runtime.apply(input);
        if is_page {
            return;
        }
    }
}

fn done(id: ClientMessageId, full_text: &str) -> InboundEvent {
    InboundEvent::Done {
        client_message_id: id.to_string(),
        full_text: Some(full_text.to_string()),
    }
}

fn delta(id: ClientMessageId, text: &str) -> InboundEvent {
    InboundEvent::Delta {
        client_message_id: id.to_string(),
        delta: text.to_string(),
    }
}

#[tokio::test(start_paused = true)]
async fn events_only_touch_their_own_turn() {
    let mut screen = connected_screen(FakeChannel::online());
    let first = screen.submit("first").unwrap();
    screen.handle_event(done(first, "one"));
    let second = screen.submit("second").unwrap();
    screen.handle_event(delta(second, "partial"));

    screen.handle_event(done(first, "one, revised"));
    screen.handle_event(delta(ClientMessageId::generate(), "stray"));
    screen.handle_event(delta(second, "!"));

    let turns = screen.turns();
    assert_eq!(turns[0].answer, "one, revised");
    assert_eq!(turns[1].answer, "partial!");
    assert_eq!(turns[1].status, TurnStatus::Streaming);
}

#[tokio::test]
async fn optimistic_turn_exists_before_its_first_event() {
    let channel = FakeChannel::online();
    *channel.echo.lock().unwrap() = Some("instant".to_string());
    let (mut runtime, _state) = runtime(channel.clone(), FakeHistory::with_turns(0));

    let id = runtime.submit("Hello").unwrap();
    let input = runtime.next_input().await;
    assert!(matches!(input, RuntimeInput::Event(InboundEvent::Delta { .. })));
    runtime.apply(input);

    let turn = runtime.screen().turns().last().unwrap();
    assert_eq!(turn.client_message_id, Some(id));
    assert_eq!(turn.question, "Hello");
    assert_eq!(turn.answer, "instant");
}

#[test]
fn repeated_done_is_idempotent() {
    let id = ClientMessageId::generate();
    let mut state = ConversationState::new(None);
    state
        .store
        .append(Turn::optimistic(None, id, "q", Utc::now()));

    dispatch(&mut state, done(id, "final"));
    let once = (state.store.clone(), state.stream.clone());
    dispatch(&mut state, done(id, "final"));

    assert_eq!((state.store.clone(), state.stream.clone()), once);
    assert_eq!(state.store.turns()[0].answer, "final");
}

#[tokio::test(start_paused = true)]
async fn animation_reveals_exact_text_and_completes_once() {
    let text = "Hi there! ünïcödé";
    for (chars_per_tick, tick_ms) in [(1, 1), (3, 16), (5, 40), (100, 7)] {
        let id = ClientMessageId::generate();
        let mut animator = Animator::new(chars_per_tick, Duration::from_millis(tick_ms));
        animator.animate(id, text);

        let mut completions = 0;
        while let Ok(frame) =
            tokio::time::timeout(Duration::from_secs(5), animator.next_frame()).await
        {
            assert_eq!(frame.owner, id);
            assert!(text.starts_with(animator.typewriter().visible()));
            if frame.reveal == Reveal::Completed {
                completions += 1;
            }
        }

        assert_eq!(completions, 1, "k={chars_per_tick} t={tick_ms}ms");
        assert_eq!(animator.typewriter().visible(), text);
    }
}

#[tokio::test(start_paused = true)]
async fn new_animation_replaces_the_running_one() {
    let first = ClientMessageId::generate();
    let second = ClientMessageId::generate();
    let mut animator = Animator::new(1, Duration::from_millis(10));

    animator.animate(first, "aaaaaaaa");
    animator.next_frame().await;
    assert_eq!(animator.typewriter().visible(), "a");

    animator.animate(second, "bbbb");
    while let Ok(frame) =
        tokio::time::timeout(Duration::from_secs(1), animator.next_frame()).await
    {
        assert_eq!(frame.owner, second);
        assert!(animator.typewriter().visible().chars().all(|c| c == 'b'));
    }
    assert_eq!(animator.visible_for(second), Some("bbbb"));
    assert_eq!(animator.visible_for(first), None);
}

#[test]
fn prepending_older_page_keeps_order_without_duplicates() {
    let turn = |minute: i64| Turn {
        session_id: None,
        client_message_id: None,
        question: format!("q{minute}"),
        answer: format!("a{minute}"),
        timestamp: Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap(),
        status: TurnStatus::Done,
    };
    let mut store = MessageStore::new();
    store.replace_all((20..30).map(turn).collect());

    let inserted = store.prepend_page((5..20).rev().map(turn).collect());
    assert_eq!(inserted, 15);
    assert_eq!(store.len(), 25);
    assert!(
        store
            .turns()
            .windows(2)
            .all(|pair| pair[0].timestamp < pair[1].timestamp)
    );

    // Re-delivering an overlapping page adds nothing.
    assert_eq!(store.prepend_page((15..25).map(turn).collect()), 0);
    assert_eq!(store.len(), 25);
}

#[tokio::test(start_paused = true)]
async fn happy_path_streams_and_completes() {
    let channel = FakeChannel::online();
    let mut screen = connected_screen(channel.clone());

    let id = screen.submit("Hello").unwrap();
    let turn = screen.turns().last().unwrap();
    assert_eq!((turn.question.as_str(), turn.answer.as_str()), ("Hello", ""));
    assert_eq!(channel.sent()[0].session_id, None);
    assert!(screen.is_typing());

    screen.handle_event(InboundEvent::SessionCreated {
        session_id: "s1".to_string(),
        client_message_id: None,
    });
    let s1 = SessionId::new("s1").unwrap();
    assert_eq!(screen.turns()[0].session_id.as_ref(), Some(&s1));
    assert_eq!(screen.active_session(), Some(&s1));
    let effects = screen.drain_effects();
    assert!(effects.contains(&ScreenEffect::RouteChanged(Some(s1.clone()))));
    assert!(effects.contains(&ScreenEffect::InvalidateSessions));

    screen.handle_event(InboundEvent::Start {
        client_message_id: Some(id.to_string()),
    });
    screen.handle_event(delta(id, "Hi"));
    screen.handle_event(delta(id, "Hi"));
    assert_eq!(screen.turns()[0].answer, "HiHi");
    assert!(screen.is_streaming());

    screen.handle_event(done(id, "Hi there!"));
    assert_eq!(screen.turns()[0].answer, "Hi there!");
    assert_eq!(screen.turns()[0].status, TurnStatus::Done);
    assert!(!screen.is_streaming());
    assert!(!screen.is_typing());
    assert_eq!(screen.stream_state(), &StreamState::Done(id));
}

#[test]
fn sending_while_disconnected_fails_the_turn() {
    let channel = FakeChannel::offline();
    let mut screen = ChatScreen::new(channel.clone(), ScreenConfig::default());

    screen.submit("Hello").unwrap();

    let turn = screen.turns().last().unwrap();
    assert_eq!(turn.answer, NOT_CONNECTED_MESSAGE);
    assert_eq!(turn.status, TurnStatus::Error);
    assert!(channel.sent().is_empty());
    assert!(!screen.is_typing());
    assert!(!screen.is_streaming());
}

#[tokio::test]
async fn scrolling_to_top_loads_older_history_and_keeps_position() {
    let history = FakeHistory::with_turns(45);
    let (mut runtime, _state) = runtime(FakeChannel::online(), history);

    runtime.switch_session(Some(SessionId::new("s1").unwrap()));
    runtime.flush().await;
    next_page(&mut runtime).await;

    let screen = runtime.screen();
    assert_eq!(screen.turns().len(), 30);
    assert!(screen.pager().has_more());
    assert_eq!(screen.turns()[0].question, "question 15");
    let height_before = screen.content_height();
    let per_turn = height_before / 30.0;

    assert!(runtime.scroll_to(0.0));
    runtime.flush().await;
    next_page(&mut runtime).await;

    let screen = runtime.screen();
    assert_eq!(screen.turns().len(), 45);
    assert!(!screen.pager().has_more());
    assert_eq!(screen.turns()[0].question, "question 0");
    assert_eq!(screen.scroll().offset(), per_turn * 15.0);
    assert!(!runtime.load_older());
}

#[tokio::test(start_paused = true)]
async fn unmatched_error_leaves_store_untouched() {
    let mut screen = connected_screen(FakeChannel::online());
    let id = screen.submit("Hello").unwrap();
    screen.handle_event(done(id, "answer"));
    let before = screen.turns().to_vec();

    screen.handle_event(InboundEvent::Error {
        client_message_id: ClientMessageId::generate().to_string(),
        error: Some("late failure".to_string()),
        error_code: None,
    });
    screen.handle_event(InboundEvent::Error {
        client_message_id: "not-a-uuid".to_string(),
        error: None,
        error_code: None,
    });

    assert_eq!(screen.turns(), before.as_slice());
    assert!(
        !screen
            .drain_effects()
            .iter()
            .any(|effect| matches!(effect, ScreenEffect::Notify(_)))
    );
}
