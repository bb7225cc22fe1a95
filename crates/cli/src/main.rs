mod cli;
mod command;
mod config;
mod repl;
mod terminal;
mod view;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::warn;

use chicken_core::config::{load_dotenv, Config};
use chicken_session::{
    CoordinatorOptions, HistoryLoader, SessionDirectory, SessionMessageStore,
    StreamingCoordinator,
};
use chicken_transport::{HttpSessionTransport, SessionTransport};

use crate::cli::CliArgs;
use crate::config::CliConfig;
use crate::repl::Repl;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let terminal = Terminal::new();

    // Env first, then the config file, then flags
    load_dotenv();
    let cli_config =
        CliConfig::load(args.config.as_deref()).context("failed to load configuration")?;
    let mut config = Config::from_env();
    cli_config.apply(&mut config);
    if let Some(server) = &args.server {
        config.backend.url = server.clone();
    }
    if let Some(agent_type) = &args.agent_type {
        config.backend.agent_type = agent_type.clone();
    }
    config.validate().context("invalid configuration")?;
    config.log_summary();

    let transport = Arc::new(HttpSessionTransport::from_config(&config.backend));
    let store = Arc::new(SessionMessageStore::new());
    let directory = Arc::new(SessionDirectory::new());

    // Handle --list-sessions
    if args.list_sessions {
        directory
            .refresh_from(transport.as_ref())
            .await
            .context("failed to list sessions")?;
        terminal.print_sessions(&directory.list())?;
        return Ok(());
    }

    // Handle --delete-session
    if let Some(session_id) = &args.delete_session {
        directory
            .delete(transport.as_ref(), session_id)
            .await
            .with_context(|| format!("failed to delete session '{}'", session_id))?;
        terminal.print_info(&format!("Deleted session {}", session_id))?;
        return Ok(());
    }

    if let Err(e) = transport.health_check().await {
        warn!(error = %e, "backend health check failed");
        terminal.print_error(&format!(
            "backend at {} is not reachable ({})",
            config.backend.url, e
        ))?;
    }

    let dyn_transport: Arc<dyn SessionTransport> = transport;
    let history = HistoryLoader::new(Arc::clone(&store), Arc::clone(&dyn_transport))
        .with_page_size(config.streaming.history_page_size);
    let coordinator = StreamingCoordinator::new(
        store,
        directory,
        Arc::clone(&dyn_transport),
        CoordinatorOptions::from_config(&config),
    );
    coordinator.set_model_override(cli_config.resolve_model(args.model.as_deref()));

    let mut repl = Repl::new(
        terminal,
        coordinator,
        history,
        dyn_transport,
        config.backend.agent_type.clone(),
        cli_config.show_progress,
    );

    // Open the requested session or start a fresh one
    let session = match &args.session {
        Some(session_id) => repl.open_session(session_id).await?,
        None => repl.new_session(),
    };
    repl.terminal.print_banner(&config.backend.url, &session)?;

    repl.run().await
}
