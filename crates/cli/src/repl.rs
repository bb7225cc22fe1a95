use std::io::{self, BufRead};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use chicken_core::{MentionDocument, SessionMeta};
use chicken_session::{HistoryLoader, SessionDirectory, StreamingCoordinator, StreamingState};
use chicken_transport::SessionTransport;

use crate::command::{ReplCommand, HELP};
use crate::terminal::Terminal;
use crate::view::TranscriptView;

/// Interactive loop: reads commands, renders the focused session off store
/// and streaming-state notifications.
pub struct Repl {
    pub terminal: Terminal,
    pub coordinator: StreamingCoordinator,
    pub history: HistoryLoader,
    pub directory: Arc<SessionDirectory>,
    pub transport: Arc<dyn SessionTransport>,
    pub agent_type: String,
    pub show_progress: bool,
    session_id: String,
    view: TranscriptView,
    was_streaming: bool,
    last_progress: Option<String>,
}

impl Repl {
    pub fn new(
        terminal: Terminal,
        coordinator: StreamingCoordinator,
        history: HistoryLoader,
        transport: Arc<dyn SessionTransport>,
        agent_type: String,
        show_progress: bool,
    ) -> Self {
        let directory = Arc::clone(coordinator.directory());
        Self {
            terminal,
            coordinator,
            history,
            directory,
            transport,
            agent_type,
            show_progress,
            session_id: String::new(),
            view: TranscriptView::new(),
            was_streaming: false,
            last_progress: None,
        }
    }

    /// Focus a fresh, empty session.
    pub fn new_session(&mut self) -> SessionMeta {
        let meta = self.directory.create(Some(&self.agent_type));
        self.focus(&meta.id);
        meta
    }

    /// Focus an existing session and print its latest history.
    pub async fn open_session(&mut self, session_id: &str) -> Result<SessionMeta> {
        if let Err(e) = self.directory.refresh_from(self.transport.as_ref()).await {
            warn!(error = %e, "could not refresh session list");
        }
        if !self.directory.contains(session_id) {
            let mut meta = SessionMeta::new(session_id);
            meta.agent_type = self.agent_type.clone();
            self.directory.insert(meta);
        }

        let block = self
            .history
            .load_latest(session_id)
            .await
            .with_context(|| format!("failed to load session '{}'", session_id))?;
        // A session missing from the list still counts what it holds, so the
        // next message does not retitle it.
        let meta = self
            .directory
            .update(session_id, |m| {
                if m.message_count == 0 {
                    m.message_count = block.len();
                }
            })
            .with_context(|| format!("session '{}' vanished from the directory", session_id))?;

        self.focus(session_id);
        self.terminal.print_transcript(&block)?;
        self.view.mark_shown(&block);
        info!(session_id = %session_id, messages = block.len(), "session opened");
        Ok(meta)
    }

    fn focus(&mut self, session_id: &str) {
        self.session_id = session_id.to_string();
        self.view.clear();
        self.was_streaming = false;
    }

    pub async fn run(mut self) -> Result<()> {
        let mut lines = spawn_stdin_reader();
        let mut changes = self.coordinator.store().subscribe();
        let mut state_rx = self.coordinator.subscribe_state();

        self.terminal.print_prompt()?;

        loop {
            tokio::select! {
                line = lines.recv() => {
                    let Some(line) = line else {
                        self.terminal.print_info("Goodbye.")?;
                        break;
                    };
                    if !self.handle_line(&line).await? {
                        self.terminal.print_info("Goodbye.")?;
                        break;
                    }
                }
                change = changes.recv() => match change {
                    Ok(change) if change.session_id() == self.session_id => self.render()?,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "store notifications lagged");
                        self.render()?;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = state_rx.borrow_and_update().clone();
                    self.on_state(&state)?;
                }
                _ = tokio::signal::ctrl_c() => {
                    if self.coordinator.state().is_streaming {
                        self.coordinator.stop();
                        self.terminal.print_info("\n[stopped]")?;
                    } else {
                        self.terminal.print_info("\nGoodbye.")?;
                        break;
                    }
                }
            }
        }

        self.coordinator.stop();
        Ok(())
    }

    /// Returns `false` when the user asked to quit.
    async fn handle_line(&mut self, line: &str) -> Result<bool> {
        match ReplCommand::parse(line) {
            ReplCommand::Send(text) => {
                let handle = self.coordinator.start(&self.session_id, &text);
                debug!(exchange_id = ?handle.exchange_id(), "message submitted");
                // The prompt comes back when the reply finishes, which can be
                // before the state watch is next polled.
                if handle.exchange_id().is_some() {
                    self.was_streaming = true;
                    return Ok(true);
                }
            }
            ReplCommand::Attach(title) => {
                self.coordinator
                    .add_mention_document(MentionDocument::titled(title.clone()));
                self.terminal
                    .print_info(&format!("Attached '{}' to the next message.", title))?;
            }
            ReplCommand::Stop => {
                if self.coordinator.state().is_streaming {
                    self.coordinator.stop();
                    self.terminal.print_info("[stopped]")?;
                } else {
                    self.terminal.print_info("Nothing is streaming.")?;
                }
            }
            ReplCommand::Older => self.load_older().await?,
            ReplCommand::New => {
                let meta = self.new_session();
                self.terminal
                    .print_info(&format!("Started new session {}", meta.id))?;
            }
            ReplCommand::Sessions => {
                if let Err(e) = self.directory.refresh_from(self.transport.as_ref()).await {
                    self.terminal.print_error(&e.to_string())?;
                }
                self.terminal.print_sessions(&self.directory.list())?;
            }
            ReplCommand::Help => self.terminal.print_info(HELP)?,
            ReplCommand::Exit => return Ok(false),
            ReplCommand::Empty => {}
            ReplCommand::Unknown(command) => {
                self.terminal
                    .print_error(&format!("unknown command: {} (try /help)", command))?;
            }
        }
        self.terminal.print_prompt()?;
        Ok(true)
    }

    async fn load_older(&mut self) -> Result<()> {
        if self.coordinator.is_active_for(&self.session_id) {
            self.terminal
                .print_info("Wait for the current reply to finish first.")?;
            return Ok(());
        }
        match self.history.fetch_older(&self.session_id).await {
            Ok(0) => self.terminal.print_info("No older messages.")?,
            Ok(fetched) => {
                if let Some(block) = self.coordinator.store().get(&self.session_id) {
                    self.terminal
                        .print_info(&format!("Loaded {} older messages.", fetched))?;
                    self.view.clear();
                    self.terminal.print_transcript(&block)?;
                    self.view.mark_shown(&block);
                }
            }
            Err(e) => self.terminal.print_error(&e.to_string())?,
        }
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        if let Some(block) = self.coordinator.store().get(&self.session_id) {
            let updates = self.view.diff(&block);
            if !updates.is_empty() {
                self.terminal.display_updates(&updates)?;
            }
        }
        Ok(())
    }

    fn on_state(&mut self, state: &StreamingState) -> Result<()> {
        let streaming_here = state.is_active_for(&self.session_id);

        if streaming_here && self.show_progress && state.progress != self.last_progress {
            if let Some(progress) = &state.progress {
                self.terminal.print_progress(progress)?;
            }
        }
        self.last_progress = state.progress.clone();

        if self.was_streaming && !streaming_here {
            self.render()?;
            self.terminal.print_prompt()?;
        }
        self.was_streaming = streaming_here;
        Ok(())
    }
}

/// Blocking stdin reads on their own thread, forwarded line by line.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });
    rx
}
