use std::sync::Arc;

use chrono::Local;
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use twin_api::{
    ApiError, AuthContext, ClientMessageId, DEFAULT_REQUEST_TIMEOUT, HttpApi, SessionId,
    SessionSummary, TokenStore,
};
use twin_stream::{ChannelError, StompChannel};

use crate::chat::events::{Notice, NoticeLevel, ScreenCommand, ScreenEffect};
use crate::chat::message::TurnStatus;
use crate::chat::runtime::{ChatRuntime, RuntimeInput};
use crate::chat::sessions::SessionDirectory;
use crate::chat::view::RenderedTurn;
use crate::settings::{SettingsError, SettingsStore};

/// Environment variable overriding the stored token.
pub const TOKEN_ENV_VAR: &str = "TWIN_TOKEN";

pub const HELP_TEXT: &str = "\
Type a question and press enter to ask your twin.
  /stop              stop the current answer
  /new               start a new conversation
  /sessions [query]  list past conversations
  /open <id>         open a conversation
  /delete <id>       delete a conversation
  /more              load older messages
  /help              show this help
  /quit              exit";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AppError {
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("api error on `{stage}`: {source}"))]
    Api {
        stage: &'static str,
        source: ApiError,
    },
    #[snafu(display("chat channel error on `{stage}`: {source}"))]
    Channel {
        stage: &'static str,
        source: ChannelError,
    },
    #[snafu(display("settings error on `{stage}`: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
}

pub type AppResult<T> = Result<T, AppError>;

/// Token from the environment, falling back to the token file.
pub fn resolve_token(tokens: &TokenStore) -> AppResult<Option<String>> {
    if let Ok(token) = std::env::var(TOKEN_ENV_VAR)
        && !token.trim().is_empty()
    {
        return Ok(Some(token));
    }
    tokens.load().context(ApiSnafu {
        stage: "load-token",
    })
}

pub fn login(store: &SettingsStore, token: &str) -> AppResult<AuthContext> {
    let auth = AuthContext::new(Some(token.to_string()));
    store.token_store().save(token).context(ApiSnafu {
        stage: "save-token",
    })?;
    tracing::info!(user = auth.display_name().unwrap_or("unknown"), "token saved");
    Ok(auth)
}

pub fn logout(store: &SettingsStore) -> AppResult<()> {
    store.token_store().clear().context(ApiSnafu {
        stage: "clear-token",
    })
}

/// Writes the effective settings to the settings file.
pub fn save_settings(store: &SettingsStore) -> AppResult<()> {
    store
        .update(store.settings().as_ref().clone())
        .context(SettingsSnafu {
            stage: "save-settings",
        })
}

/// Connects the channel, wires the REST client and runs the chat until the
/// user quits. `session_id` opens an existing conversation.
pub async fn start_chat(store: &SettingsStore, session_id: Option<SessionId>) -> AppResult<()> {
    let settings = store.settings();
    let auth = AuthContext::new(resolve_token(&store.token_store())?);
    if !auth.is_authenticated() {
        tracing::warn!("no valid token; run `twin login <token>` first");
    }

    let api = Arc::new(
        HttpApi::new(&settings.api_base_url, auth.clone(), DEFAULT_REQUEST_TIMEOUT).context(
            ApiSnafu {
                stage: "build-api-client",
            },
        )?,
    );
    let channel_config = settings.channel_config().context(ChannelSnafu {
        stage: "build-channel-config",
    })?;
    let channel = Arc::new(StompChannel::new(channel_config));
    let connection_rx = channel.subscribe_state();
    if let Some(worker) = channel.connect(auth.bearer()) {
        tokio::spawn(worker);
    }

    let sessions = SessionDirectory::new(api.clone(), settings.session_cache_ttl());
    let mut runtime = ChatRuntime::new(
        channel,
        connection_rx,
        api,
        sessions,
        settings.screen_config(),
    );
    runtime.switch_session(session_id);

    TerminalApp::new(runtime, tokio::io::stdout()).run().await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Answer currently written to the terminal piece by piece.
struct LiveAnswer {
    client_message_id: ClientMessageId,
    printed: String,
}

/// Line-oriented terminal front end over a [`ChatRuntime`].
pub struct TerminalApp<W> {
    runtime: ChatRuntime,
    out: W,
    live: Option<LiveAnswer>,
}

impl<W: AsyncWrite + Unpin> TerminalApp<W> {
    pub fn new(runtime: ChatRuntime, out: W) -> Self {
        Self {
            runtime,
            out,
            live: None,
        }
    }

    pub fn runtime(&self) -> &ChatRuntime {
        &self.runtime
    }

    /// Runs until `/quit` or end of input.
    pub async fn run(mut self) -> AppResult<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.write("Digital twin chat. Type /help for commands.\n")
            .await?;
        self.after_update().await?;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = line.context(ReadInputSnafu { stage: "read-stdin-line" })?;
                    let Some(line) = line else {
                        tracing::debug!("input closed");
                        break;
                    };
                    let Some(command) = ScreenCommand::parse(&line) else {
                        continue;
                    };
                    if self.execute(command).await? == Flow::Quit {
                        break;
                    }
                }
                input = self.runtime.next_input() => self.apply(input).await?,
            }
            self.after_update().await?;
        }

        self.runtime.shutdown();
        self.out.flush().await.context(WriteOutputSnafu {
            stage: "flush-on-exit",
        })?;
        Ok(())
    }

    async fn apply(&mut self, input: RuntimeInput) -> AppResult<()> {
        let before = self.runtime.screen().turns().len();
        let page = match &input {
            RuntimeInput::Page { request, .. } => Some(request.is_first_page()),
            _ => None,
        };
        self.runtime.apply(input);

        let inserted = self.runtime.screen().turns().len().saturating_sub(before);
        if let Some(first_page) = page
            && inserted > 0
        {
            self.print_inserted(inserted, first_page).await?;
        }
        Ok(())
    }

    async fn execute(&mut self, command: ScreenCommand) -> AppResult<Flow> {
        match command {
            ScreenCommand::Ask(question) => {
                if let Some(client_message_id) = self.runtime.submit(&question) {
                    self.finish_live().await?;
                    self.write(&format!("\nyou > {question}\ntwin> ")).await?;
                    self.live = Some(LiveAnswer {
                        client_message_id,
                        printed: String::new(),
                    });
                }
            }
            ScreenCommand::Stop => {
                if !self.runtime.stop() {
                    self.notice(&Notice::info("Nothing to stop.")).await?;
                }
            }
            ScreenCommand::NewConversation => {
                self.finish_live().await?;
                self.runtime.switch_session(None);
                self.write("\n--- new conversation ---\n").await?;
            }
            ScreenCommand::Open(session_id) => {
                self.finish_live().await?;
                self.write(&format!("\n--- conversation {session_id} ---\n"))
                    .await?;
                self.runtime.switch_session(Some(session_id));
            }
            ScreenCommand::ListSessions(search) => {
                match self.runtime.list_sessions(search.as_deref()).await {
                    Ok(sessions) => self.print_sessions(&sessions).await?,
                    Err(error) => self.api_failure("list-sessions", &error).await?,
                }
            }
            ScreenCommand::Delete(session_id) => {
                match self.runtime.delete_session(&session_id).await {
                    Ok(()) => {
                        self.notice(&Notice::info(format!("Deleted {session_id}.")))
                            .await?;
                    }
                    Err(error) => self.api_failure("delete-session", &error).await?,
                }
            }
            ScreenCommand::LoadOlder => {
                // Jumping to the top is what triggers paging in a scrolled view.
                if !self.runtime.scroll_to(0.0) && !self.runtime.load_older() {
                    self.notice(&Notice::info("No older messages.")).await?;
                }
            }
            ScreenCommand::Help => self.write(&format!("{HELP_TEXT}\n")).await?,
            ScreenCommand::Quit => return Ok(Flow::Quit),
            ScreenCommand::Invalid(message) => {
                self.notice(&Notice::warning(format!("{message}. Type /help.")))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    /// Writes new answer text and user-facing effects.
    async fn after_update(&mut self) -> AppResult<()> {
        for effect in self.runtime.flush().await {
            match effect {
                ScreenEffect::RouteChanged(Some(session_id)) => {
                    tracing::info!(session_id = %session_id, "route changed");
                }
                ScreenEffect::RouteChanged(None) => {
                    tracing::info!("route changed to new conversation");
                }
                ScreenEffect::Notify(notice) => self.notice(&notice).await?,
                ScreenEffect::FetchPage(_) | ScreenEffect::InvalidateSessions => {}
            }
        }
        self.write_live().await
    }

    async fn write_live(&mut self) -> AppResult<()> {
        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };
        let rendered = self.runtime.screen().render();
        let Some(turn) = rendered
            .iter()
            .find(|turn| turn.client_message_id == Some(live.client_message_id))
        else {
            // The turn left the screen with a session switch.
            self.live = None;
            return Ok(());
        };

        let mut chunk = String::new();
        match turn.answer.strip_prefix(live.printed.as_str()) {
            Some(rest) => chunk.push_str(rest),
            None => {
                chunk.push_str("\n      ");
                chunk.push_str(turn.answer);
            }
        }
        live.printed.clear();
        live.printed.push_str(turn.answer);

        let finished = !turn.cursor && turn.status.is_terminal();
        if finished {
            chunk.push_str(status_suffix(turn.status));
            chunk.push('\n');
            self.live = None;
        }

        if !chunk.is_empty() {
            self.write(&chunk).await?;
        }
        Ok(())
    }

    /// Writes the rest of a half-written answer before other output.
    async fn finish_live(&mut self) -> AppResult<()> {
        let Some(live) = self.live.take() else {
            return Ok(());
        };
        let rest = self
            .runtime
            .screen()
            .turns()
            .iter()
            .find(|turn| turn.client_message_id == Some(live.client_message_id))
            .and_then(|turn| turn.answer.strip_prefix(live.printed.as_str()))
            .unwrap_or_default()
            .to_string();
        self.write(&format!("{rest}\n")).await
    }

    async fn print_inserted(&mut self, inserted: usize, first_page: bool) -> AppResult<()> {
        let mut text = String::new();
        if !first_page {
            text.push_str("--- earlier messages ---\n");
        }
        for turn in self.runtime.screen().render().iter().take(inserted) {
            text.push_str(&format_turn(turn));
        }
        if !first_page {
            text.push_str("--- end of earlier messages ---\n");
        }
        if self.runtime.screen().pager().has_more() {
            text.push_str("(/more for older messages)\n");
        }
        self.write(&text).await
    }

    async fn print_sessions(&mut self, sessions: &[SessionSummary]) -> AppResult<()> {
        if sessions.is_empty() {
            return self.write("No conversations yet.\n").await;
        }

        let active = self.runtime.route().cloned();
        let mut text = String::new();
        for session in sessions {
            let marker = if active.as_ref() == Some(&session.id) {
                '*'
            } else {
                ' '
            };
            let title = session.display_title();
            let updated = session
                .updated_at
                .map(|at| at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default();
            text.push_str(&format!(
                "{marker} {id}  {title} ({count} messages) {updated}\n",
                id = session.id,
                count = session.message_count,
            ));
        }
        self.write(&text).await
    }

    async fn api_failure(&mut self, stage: &'static str, error: &ApiError) -> AppResult<()> {
        tracing::warn!(stage, %error, "api call failed");
        self.notice(&Notice::error(error.user_message())).await
    }

    async fn notice(&mut self, notice: &Notice) -> AppResult<()> {
        let label = match notice.level {
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        };
        let line = format!("[{label}] {}\n", notice.message);
        let mut stderr = tokio::io::stderr();
        stderr
            .write_all(line.as_bytes())
            .await
            .context(WriteOutputSnafu {
                stage: "write-notice",
            })?;
        stderr.flush().await.context(WriteOutputSnafu {
            stage: "flush-notice",
        })
    }

    async fn write(&mut self, text: &str) -> AppResult<()> {
        self.out
            .write_all(text.as_bytes())
            .await
            .context(WriteOutputSnafu {
                stage: "write-transcript",
            })?;
        self.out.flush().await.context(WriteOutputSnafu {
            stage: "flush-transcript",
        })
    }
}

fn format_turn(turn: &RenderedTurn<'_>) -> String {
    format!(
        "you > {}\ntwin> {}{}\n",
        turn.question,
        turn.answer,
        status_suffix(turn.status)
    )
}

fn status_suffix(status: TurnStatus) -> &'static str {
    match status {
        TurnStatus::Cancelled => " [stopped]",
        TurnStatus::Error => " [failed]",
        TurnStatus::Pending | TurnStatus::Streaming | TurnStatus::Done => "",
    }
}
