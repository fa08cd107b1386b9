use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use twin_api::SessionId;
use twin_client::app::{self, AppResult};
use twin_client::settings::SettingsStore;

/// Terminal client for chatting with your digital twin.
#[derive(Parser)]
#[command(name = "twin", version, about)]
struct Cli {
    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Chat with your twin (the default)
    Chat {
        /// Conversation to reopen
        session: Option<String>,
    },
    /// Store the bearer token used for the server
    Login { token: String },
    /// Forget the stored token
    Logout,
    /// Print the effective settings
    Config {
        /// Also write them to the settings file
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr so the transcript on stdout stays clean.
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli.command.unwrap_or(Command::Chat { session: None })).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "twin exited with an error");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> AppResult<()> {
    let store = SettingsStore::load();
    match command {
        Command::Chat { session } => {
            let session_id = session.and_then(|raw| SessionId::new(raw).ok());
            app::start_chat(&store, session_id).await
        }
        Command::Login { token } => {
            let auth = app::login(&store, &token)?;
            match auth.display_name() {
                Some(name) => println!("Signed in as {name}."),
                None => println!("Token saved."),
            }
            Ok(())
        }
        Command::Logout => {
            app::logout(&store)?;
            println!("Signed out.");
            Ok(())
        }
        Command::Config { save } => {
            if save {
                app::save_settings(&store)?;
            }
            println!("# {}", store.config_path().display());
            match serde_json::to_string_pretty(store.settings().as_ref()) {
                Ok(json) => println!("{json}"),
                Err(error) => eprintln!("error: {error}"),
            }
            Ok(())
        }
    }
}
