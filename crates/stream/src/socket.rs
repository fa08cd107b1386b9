use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use futures::{SinkExt, Stream, StreamExt};
use snafu::ResultExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::channel::{ChannelConfig, ChatChannel, ConnectionState, EventHandler};
use crate::error::{
    ChannelResult, ClosedSnafu, ConnectSnafu, HandshakeTimeoutSnafu, ReadSnafu, RejectedSnafu,
    WriteSnafu,
};
use crate::protocol::{InboundEvent, QuestionRequest};
use crate::stomp::{Command, Frame, decode_frames};

const SUBSCRIPTION_ID: &str = "twin-events";

/// Connection loop future returned by [`StompChannel::connect`]; the caller
/// spawns it on its runtime.
pub type ChannelWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// STOMP-over-websocket chat channel with a constant-delay reconnect loop.
pub struct StompChannel {
    config: ChannelConfig,
    handler: Arc<ArcSwap<EventHandler>>,
    state: Arc<watch::Sender<ConnectionState>>,
    outbound_tx: mpsc::UnboundedSender<Frame>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl StompChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ConnectionState::NotConnected);

        Self {
            config,
            handler: Arc::new(ArcSwap::from_pointee(EventHandler::noop())),
            state: Arc::new(state),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            shutdown_tx: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Builds the connection worker. Only the first call with a token yields
    /// a worker; later calls are no-ops so one channel never opens two
    /// sockets. Without a token the channel reports `Disconnected`.
    pub fn connect(&self, token: Option<&str>) -> Option<ChannelWorker> {
        let mut outbound_rx = lock(&self.outbound_rx);
        if outbound_rx.is_none() {
            tracing::debug!("chat channel already started; ignoring connect");
            return None;
        }

        let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) else {
            tracing::warn!("no auth token available; chat channel stays disconnected");
            self.state.send_replace(ConnectionState::Disconnected);
            return None;
        };

        let outbound_rx = outbound_rx.take()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *lock(&self.shutdown_tx) = Some(shutdown_tx);
        self.state.send_replace(ConnectionState::Connecting);

        Some(Box::pin(run_worker(
            self.config.clone(),
            token.to_string(),
            outbound_rx,
            shutdown_rx,
            self.state.clone(),
            self.handler.clone(),
        )))
    }

    fn publish(&self, frame: Frame) -> bool {
        self.outbound_tx.send(frame).is_ok()
    }
}

impl ChatChannel for StompChannel {
    fn send(&self, request: &QuestionRequest) -> bool {
        if !self.is_connected() {
            tracing::warn!(
                client_message_id = %request.client_message_id,
                state = self.state().label(),
                "refusing to send question while not connected"
            );
            return false;
        }

        match serde_json::to_string(request) {
            Ok(body) => self.publish(Frame::send_json(&self.config.chat_destination, body)),
            Err(error) => {
                tracing::warn!(error = %error, "failed to encode question");
                false
            }
        }
    }

    fn cancel(&self, client_message_id: &str) -> bool {
        if !self.is_connected() {
            return false;
        }

        // The server expects the bare correlation id as the body.
        self.publish(Frame::send_text(
            &self.config.cancel_destination,
            client_message_id,
        ))
    }

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    fn set_handler(&self, handler: EventHandler) {
        self.handler.store(Arc::new(handler));
    }

    fn disconnect(&self) {
        // A channel that never started can no longer be started.
        lock(&self.outbound_rx).take();

        match lock(&self.shutdown_tx).take() {
            Some(shutdown_tx) => {
                let _ = shutdown_tx.send(());
            }
            None => {
                self.state.send_replace(ConnectionState::Closed);
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_worker(
    config: ChannelConfig,
    token: String,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    mut shutdown_rx: oneshot::Receiver<()>,
    state: Arc<watch::Sender<ConnectionState>>,
    handler: Arc<ArcSwap<EventHandler>>,
) {
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            state.send_replace(ConnectionState::Reconnecting);
        }

        match run_session(
            &config,
            &token,
            &mut outbound_rx,
            &mut shutdown_rx,
            &state,
            &handler,
        )
        .await
        {
            Ok(()) => break,
            Err(error) => {
                state.send_replace(ConnectionState::Disconnected);
                tracing::warn!(
                    attempt,
                    url = config.ws_url(),
                    delay_ms = config.reconnect_delay.as_millis() as u64,
                    error = %error,
                    "chat channel lost; scheduling reconnect"
                );
            }
        }

        attempt = attempt.saturating_add(1);
        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }

    state.send_replace(ConnectionState::Closed);
    tracing::info!(url = config.ws_url(), "chat channel closed");
}

// Returns Ok once shutdown is requested; any error ends the session and
// leaves reconnecting to the caller.
async fn run_session(
    config: &ChannelConfig,
    token: &str,
    outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
    shutdown_rx: &mut oneshot::Receiver<()>,
    state: &watch::Sender<ConnectionState>,
    handler: &ArcSwap<EventHandler>,
) -> ChannelResult<()> {
    let url = config.ws_url();
    let (socket, _) = tokio::select! {
        _ = &mut *shutdown_rx => return Ok(()),
        result = tokio_tungstenite::connect_async(url) => {
            result.context(ConnectSnafu { stage: "open-websocket", url })?
        }
    };
    let (mut sink, mut stream) = socket.split();

    sink.send(Message::Text(Frame::connect(config.host(), token).encode()))
        .await
        .context(WriteSnafu {
            stage: "send-connect",
        })?;

    let handshake = tokio::time::timeout(config.handshake_timeout, await_connected(&mut stream));
    tokio::select! {
        _ = &mut *shutdown_rx => return Ok(()),
        result = handshake => match result {
            Ok(connected) => connected?,
            Err(_) => {
                return HandshakeTimeoutSnafu {
                    stage: "await-connected",
                }
                .fail();
            }
        },
    }

    sink.send(Message::Text(
        Frame::subscribe(SUBSCRIPTION_ID, &config.events_destination).encode(),
    ))
    .await
    .context(WriteSnafu {
        stage: "send-subscribe",
    })?;

    let mut stale = 0_usize;
    while outbound_rx.try_recv().is_ok() {
        stale += 1;
    }
    if stale > 0 {
        tracing::warn!(stale, "discarded frames queued while disconnected");
    }

    state.send_replace(ConnectionState::Connected);
    tracing::info!(url, "chat channel connected");

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                let _ = sink.send(Message::Text(Frame::disconnect().encode())).await;
                let _ = sink.close().await;
                return Ok(());
            }
            Some(frame) = outbound_rx.recv() => {
                sink.send(Message::Text(frame.encode()))
                    .await
                    .context(WriteSnafu { stage: "send-frame" })?;
            }
            next = stream.next() => match next {
                Some(Ok(Message::Text(text))) => dispatch_frames(&text, handler)?,
                Some(Ok(Message::Close(_))) | None => {
                    return ClosedSnafu { stage: "read-frame" }.fail();
                }
                Some(Ok(_)) => {}
                Some(Err(source)) => {
                    return Err(source).context(ReadSnafu { stage: "read-frame" });
                }
            },
        }
    }
}

async fn await_connected<S>(stream: &mut S) -> ChannelResult<()>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        let text = match message.context(ReadSnafu {
            stage: "await-connected",
        })? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        for frame in decode_frames(&text)? {
            match frame.command {
                Command::Connected => return Ok(()),
                Command::Error => return rejected(&frame, "await-connected"),
                other => {
                    tracing::debug!(command = other.as_str(), "ignoring frame before CONNECTED");
                }
            }
        }
    }

    ClosedSnafu {
        stage: "await-connected",
    }
    .fail()
}

fn dispatch_frames(text: &str, handler: &ArcSwap<EventHandler>) -> ChannelResult<()> {
    let frames = match decode_frames(text) {
        Ok(frames) => frames,
        Err(error) => {
            tracing::debug!(error = %error, "dropping undecodable STOMP message");
            return Ok(());
        }
    };

    for frame in frames {
        match frame.command {
            Command::Message => match InboundEvent::decode(&frame.body) {
                Ok(event) => handler.load().handle(event),
                Err(error) => {
                    tracing::debug!(error = %error, "dropping malformed event payload");
                }
            },
            Command::Error => return rejected(&frame, "read-frame"),
            other => {
                tracing::debug!(command = other.as_str(), "ignoring STOMP frame");
            }
        }
    }
    Ok(())
}

fn rejected(frame: &Frame, stage: &'static str) -> ChannelResult<()> {
    let message = frame
        .header("message")
        .map(str::to_string)
        .unwrap_or_else(|| frame.body.trim().to_string());
    RejectedSnafu { stage, message }.fail()
}
