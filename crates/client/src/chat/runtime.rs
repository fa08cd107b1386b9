use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use twin_api::{
    ApiResult, ClientMessageId, HistoryPage, HistorySource, SessionId, SessionSummary,
};
use twin_stream::{ChatChannel, ConnectionState, EventHandler, InboundEvent};

use crate::chat::animator::AnimationFrame;
use crate::chat::events::ScreenEffect;
use crate::chat::pager::PageRequest;
use crate::chat::sessions::SessionDirectory;
use crate::chat::view::{ChatScreen, ScreenConfig};

type PageResult = (PageRequest, ApiResult<HistoryPage>);

/// Everything besides user input that can change the screen.
#[derive(Debug)]
pub enum RuntimeInput {
    Event(InboundEvent),
    Connection(ConnectionState),
    Page {
        request: PageRequest,
        result: ApiResult<HistoryPage>,
    },
    Frame(AnimationFrame),
}

/// Drives a [`ChatScreen`]: routes channel events, connection changes,
/// history responses and animation ticks into it one at a time, and carries
/// out the effects it queues.
pub struct ChatRuntime {
    screen: ChatScreen,
    channel: Arc<dyn ChatChannel>,
    connection_rx: watch::Receiver<ConnectionState>,
    events_rx: mpsc::UnboundedReceiver<InboundEvent>,
    history: Arc<dyn HistorySource>,
    pages_tx: mpsc::UnboundedSender<PageResult>,
    pages_rx: mpsc::UnboundedReceiver<PageResult>,
    sessions: SessionDirectory,
    route: Option<SessionId>,
}

impl ChatRuntime {
    pub fn new(
        channel: Arc<dyn ChatChannel>,
        mut connection_rx: watch::Receiver<ConnectionState>,
        history: Arc<dyn HistorySource>,
        sessions: SessionDirectory,
        config: ScreenConfig,
    ) -> Self {
        let events_rx = install_handler(channel.as_ref());
        let (pages_tx, pages_rx) = mpsc::unbounded_channel();
        let mut screen = ChatScreen::new(Arc::clone(&channel), config);
        screen.on_connection_state(*connection_rx.borrow_and_update());

        Self {
            screen,
            channel,
            connection_rx,
            events_rx,
            history,
            pages_tx,
            pages_rx,
            sessions,
            route: None,
        }
    }

    pub fn screen(&self) -> &ChatScreen {
        &self.screen
    }

    /// Session shown in the route; `None` for a new conversation.
    pub fn route(&self) -> Option<&SessionId> {
        self.route.as_ref()
    }

    pub fn sessions(&self) -> &SessionDirectory {
        &self.sessions
    }

    /// Waits for the next non-user input. Cancel safe.
    pub async fn next_input(&mut self) -> RuntimeInput {
        let connection_rx = &mut self.connection_rx;
        tokio::select! {
            Some(event) = self.events_rx.recv() => RuntimeInput::Event(event),
            Some(state) = async {
                connection_rx.changed().await.ok()?;
                Some(*connection_rx.borrow_and_update())
            } => RuntimeInput::Connection(state),
            Some((request, result)) = self.pages_rx.recv() => RuntimeInput::Page { request, result },
            frame = self.screen.next_animation_frame() => RuntimeInput::Frame(frame),
        }
    }

    /// Feeds one input to the screen and lays out the result.
    pub fn apply(&mut self, input: RuntimeInput) {
        match input {
            RuntimeInput::Event(event) => self.screen.handle_event(event),
            RuntimeInput::Connection(state) => {
                tracing::info!(state = state.label(), "connection state changed");
                self.screen.on_connection_state(state);
            }
            RuntimeInput::Page { request, result } => self.screen.apply_page(request, result),
            RuntimeInput::Frame(frame) => self.screen.on_animation_frame(frame),
        }
        self.screen.on_layout();
    }

    pub fn submit(&mut self, question: &str) -> Option<ClientMessageId> {
        let id = self.screen.submit(question);
        self.screen.on_layout();
        id
    }

    pub fn stop(&mut self) -> bool {
        self.screen.stop()
    }

    /// Opens a session, or a new conversation for `None`. Events still
    /// queued for the previous session are dropped with the old handler.
    pub fn switch_session(&mut self, session_id: Option<SessionId>) {
        self.events_rx = install_handler(self.channel.as_ref());
        self.screen.switch_session(session_id);
        self.screen.on_layout();
    }

    pub fn scroll_to(&mut self, offset: f32) -> bool {
        self.screen.on_scroll(offset)
    }

    pub fn load_older(&mut self) -> bool {
        self.screen.load_older()
    }

    pub async fn list_sessions(&self, search: Option<&str>) -> ApiResult<Vec<SessionSummary>> {
        self.sessions.list(search).await
    }

    /// Deletes a session; deleting the open one starts a new conversation.
    pub async fn delete_session(&mut self, session_id: &SessionId) -> ApiResult<()> {
        self.sessions.delete(session_id).await?;
        tracing::info!(session_id = %session_id, "session deleted");
        if self.route.as_ref() == Some(session_id) {
            self.switch_session(None);
        }
        Ok(())
    }

    /// Performs queued effects and returns the ones meant for the user:
    /// route changes and notices.
    pub async fn flush(&mut self) -> Vec<ScreenEffect> {
        let mut visible = Vec::new();
        for effect in self.screen.drain_effects() {
            match effect {
                ScreenEffect::FetchPage(request) => self.spawn_fetch(request),
                ScreenEffect::InvalidateSessions => self.sessions.invalidate().await,
                ScreenEffect::RouteChanged(session_id) => {
                    self.route = session_id.clone();
                    visible.push(ScreenEffect::RouteChanged(session_id));
                }
                notice @ ScreenEffect::Notify(_) => visible.push(notice),
            }
        }
        visible
    }

    pub fn shutdown(&self) {
        self.channel.set_handler(EventHandler::noop());
        self.channel.disconnect();
    }

    fn spawn_fetch(&self, request: PageRequest) {
        let history = Arc::clone(&self.history);
        let pages_tx = self.pages_tx.clone();
        tokio::spawn(async move {
            tracing::debug!(
                session_id = %request.session_id,
                page = request.page,
                "fetching history page"
            );
            let result = history
                .fetch_page(&request.session_id, request.page, request.page_size)
                .await;
            if pages_tx.send((request, result)).is_err() {
                tracing::debug!("history page dropped; runtime is gone");
            }
        });
    }
}

/// Installs a handler forwarding events into a fresh queue.
fn install_handler(channel: &dyn ChatChannel) -> mpsc::UnboundedReceiver<InboundEvent> {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    channel.set_handler(EventHandler::new(move |event| {
        // The receiver is gone once the handler has been replaced.
        let _ = events_tx.send(event);
    }));
    events_rx
}
