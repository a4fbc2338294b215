mod commands;
mod route;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// mollei -- an emotionally-aware companion, one pipeline turn at a time.
#[derive(Parser)]
#[command(name = "mollei", version, about)]
struct Cli {
    /// Config file (default: ~/.mollei/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit JSON log lines instead of human-readable ones.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one turn and stream the reply.
    Chat {
        /// The user message.
        message: String,
        /// Session id; turn numbers continue within a session.
        #[arg(long, default_value = "cli")]
        session: String,
        /// User id recorded on the trace.
        #[arg(long, default_value = "local")]
        user: String,
        /// Print raw stream events as JSON lines.
        #[arg(long)]
        json: bool,
        /// Use the scripted offline provider instead of the Anthropic API.
        #[arg(long)]
        offline: bool,
    },

    /// Interactive conversation within one session.
    Repl {
        /// Session id (generated when omitted).
        #[arg(long)]
        session: Option<String>,
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long)]
        offline: bool,
    },

    /// Check a message against the crisis heuristics and input sanitizer.
    Heuristics {
        message: String,
    },

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    ml_telemetry::logging::init(
        &config.general.service_name,
        &config.general.log_level,
        cli.json_logs || config.general.json_logs,
    );

    match cli.command {
        Commands::Chat {
            message,
            session,
            user,
            json,
            offline,
        } => {
            commands::chat::run(config, &session, &user, &message, json, offline).await?;
        }
        Commands::Repl {
            session,
            user,
            offline,
        } => {
            commands::repl::run(config, session, &user, offline).await?;
        }
        Commands::Heuristics { message } => {
            commands::heuristics::run(&message)?;
        }
        Commands::Config => {
            commands::config::run(&config)?;
        }
    }

    Ok(())
}
